// src/krb/der.rs

//! Just enough DER to read the service principal out of a negotiation
//! token before handing it to the acceptor.

use crate::error;
use crate::Result;

/// DER content of OID 1.3.6.1.5.5.2.
pub const SPNEGO_MECH_OID: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];
/// DER content of OID 1.2.840.113554.1.2.2.
pub const KRB5_MECH_OID: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x12, 0x01, 0x02, 0x02];
/// DER content of OID 1.2.840.113554.1.2.2.1.
pub const NT_GSS_KRB5_PRINCIPAL_OID: &[u8] =
    &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x12, 0x01, 0x02, 0x02, 0x01];

const OID: u8 = 0x06;
const OCTET_STRING: u8 = 0x04;

/// One DER element. Iterating a constructed element consumes its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Der<'a> {
    tag: u8,
    content: &'a [u8],
}

impl<'a> Der<'a> {
    /// Reads the first element of `bytes`. Trailing bytes are ignored.
    pub fn parse(bytes: &'a [u8]) -> Result<Der<'a>> {
        let mut input = bytes;
        read_element(&mut input)
    }

    pub fn tag(&self) -> u8 {
        self.tag
    }

    pub fn content(&self) -> &'a [u8] {
        self.content
    }

    pub fn has_next(&self) -> bool {
        (self.tag & 0x30 != 0 || self.tag == OCTET_STRING) && !self.content.is_empty()
    }

    /// Consumes and returns the next child element.
    pub fn next(&mut self) -> Result<Der<'a>> {
        if !self.has_next() {
            return Err(error::negotiate(format!(
                "no element left inside tag 0x{:x}",
                self.tag
            )));
        }
        read_element(&mut self.content)
    }

    /// Consumes children until one carries `tag`.
    fn choose(&mut self, tag: u8) -> Option<Der<'a>> {
        while self.has_next() {
            let der = self.next().ok()?;
            if der.tag == tag {
                return Some(der);
            }
        }
        None
    }

    /// Descends through `tags`: an element whose tag already matches is
    /// kept, otherwise the first child with the expected tag is taken.
    pub fn get(&mut self, tags: &[u8]) -> Result<Der<'a>> {
        let mut found: Option<Der<'a>> = None;
        for (i, &tag) in tags.iter().enumerate() {
            let der = match found.as_mut() {
                Some(der) => der,
                None => &mut *self,
            };
            if der.tag != tag {
                match der.choose(tag) {
                    Some(child) => found = Some(child),
                    None => {
                        let path: String = tags[..=i].iter().map(|t| format!("0x{t:x}")).collect();
                        return Err(error::negotiate(format!("Tag not found {path}")));
                    }
                }
            }
        }
        Ok(found.unwrap_or(*self))
    }

    pub fn is_oid(&self, oid: &[u8]) -> bool {
        self.tag == OID && self.content == oid
    }

    pub fn as_str(&self) -> Result<&'a str> {
        std::str::from_utf8(self.content).map_err(error::negotiate)
    }
}

fn read_element<'a>(input: &mut &'a [u8]) -> Result<Der<'a>> {
    let (&tag, rest) = input
        .split_first()
        .ok_or_else(|| error::negotiate("truncated DER element"))?;
    let (&first, mut rest) = rest
        .split_first()
        .ok_or_else(|| error::negotiate("truncated DER length"))?;

    let mut length = usize::from(first);
    if first & 0x80 != 0 {
        let count = usize::from(first & 0x7f);
        if count > 4 || rest.len() < count {
            return Err(error::negotiate("invalid DER length"));
        }
        length = rest[..count]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
        rest = &rest[count..];
    }
    if rest.len() < length {
        return Err(error::negotiate("truncated DER content"));
    }
    let (content, remaining) = rest.split_at(length);
    *input = remaining;
    Ok(Der { tag, content })
}

/// Extracts `service/host@REALM` of the ticket inside a Kerberos or
/// SPNEGO-wrapped Kerberos AP-REQ.
pub fn token_server_name(token: &[u8]) -> Result<String> {
    let mut token = Der::parse(token)?;
    let mut oid = token.next()?;
    if oid.is_oid(SPNEGO_MECH_OID) {
        // NegTokenInit [0] -> SEQUENCE -> mechToken [2] -> OCTET STRING
        token = token.next()?.get(&[0xa0, 0x30, 0xa2, OCTET_STRING])?.next()?;
        oid = token.next()?;
    }
    if !oid.is_oid(KRB5_MECH_OID) {
        return Err(error::negotiate("Malformed gss token"));
    }
    // token id 01 00 reads as an empty element tagged 1
    if token.next()?.tag() != 1 {
        return Err(error::negotiate("Not an AP-REQ token"));
    }
    // AP-REQ -> SEQUENCE -> ticket [3] -> Ticket -> SEQUENCE
    let mut ticket = token.next()?.get(&[0x6e, 0x30, 0xa3, 0x61, 0x30])?;
    let realm = ticket.get(&[0xa1, 0x1b])?.as_str()?;
    let mut names = ticket.get(&[0xa2, 0x30, 0xa1, 0x30])?;

    let mut components = Vec::new();
    while names.has_next() {
        components.push(names.next()?.as_str()?);
    }
    Ok(format!("{}@{realm}", components.join("/")))
}
