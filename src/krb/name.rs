// src/krb/name.rs

//! Kerberos principal names and the rules that map them to short local
//! user names.
//!
//! Rules use the `auth_to_local` syntax:
//!
//! ```text
//! RULE:[2:$1@$0](HTTP@.*)s/@.*//L
//! DEFAULT
//! ```
//!
//! `[n:format]` applies to principals with `n` components; `$0` is the
//! realm and `$1..$n` the components. The optional `(regex)` must match the
//! formatted string in full, `s/from/to/` substitutes (every occurrence with
//! `g`), and a trailing `L` lowercases the result.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::error;
use crate::Result;

fn name_parser() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([^/@]+)(/([^/@]+))?(@([^/@]+))?$").expect("valid name pattern")
    })
}

fn rule_parser() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"^\s*((DEFAULT)|(RULE:\[(\d*):([^\]]*)\](\(([^)]*)\))?",
            r"(s/([^/]*)/([^/]*)/(g)?)?))/?(L)?"
        ))
        .expect("valid rule pattern")
    })
}

fn parameter_parser() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([^$]*)(\$(\d*))?").expect("valid parameter pattern"))
}

/// A parsed `service[/host][@REALM]` principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KerberosName {
    service: String,
    host: Option<String>,
    realm: Option<String>,
}

impl KerberosName {
    pub fn parse(name: &str) -> Result<Self> {
        match name_parser().captures(name) {
            Some(caps) => Ok(KerberosName {
                service: caps[1].to_owned(),
                host: caps.get(3).map(|m| m.as_str().to_owned()),
                realm: caps.get(5).map(|m| m.as_str().to_owned()),
            }),
            None if name.contains('@') => Err(error::configuration(format!(
                "Malformed Kerberos name: {name}"
            ))),
            None => Ok(KerberosName {
                service: name.to_owned(),
                host: None,
                realm: None,
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }
}

impl fmt::Display for KerberosName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.service)?;
        if let Some(host) = &self.host {
            write!(f, "/{host}")?;
        }
        if let Some(realm) = &self.realm {
            write!(f, "@{realm}")?;
        }
        Ok(())
    }
}

impl FromStr for KerberosName {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        KerberosName::parse(s)
    }
}

/// How strictly rules are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuleMechanism {
    /// Every name must map to a simple name through some rule.
    #[default]
    Hadoop,
    /// Names no rule maps are kept as they are.
    Mit,
}

impl FromStr for RuleMechanism {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("hadoop") {
            Ok(RuleMechanism::Hadoop)
        } else if s.eq_ignore_ascii_case("mit") {
            Ok(RuleMechanism::Mit)
        } else {
            Err(error::configuration(format!("Invalid rule mechanism: {s}")))
        }
    }
}

#[derive(Debug, Clone)]
enum Rule {
    Default,
    Mapping {
        components: usize,
        format: String,
        matcher: Option<Regex>,
        substitution: Option<(Regex, String, bool)>,
        lowercase: bool,
    },
}

impl Rule {
    fn apply(
        &self,
        params: &[&str],
        mechanism: RuleMechanism,
        default_realm: Option<&str>,
    ) -> Result<Option<String>> {
        let (result, lowercase) = match self {
            Rule::Default => (
                (default_realm == Some(params[0])).then(|| params[1].to_owned()),
                false,
            ),
            Rule::Mapping {
                components,
                format,
                matcher,
                substitution,
                lowercase,
            } => {
                let mut result = None;
                if params.len() - 1 == *components {
                    let base = replace_parameters(format, params)?;
                    if matcher.as_ref().map_or(true, |m| m.is_match(&base)) {
                        result = Some(match substitution {
                            None => base,
                            Some((from, to, true)) => {
                                from.replace_all(&base, to.as_str()).into_owned()
                            }
                            Some((from, to, false)) => {
                                from.replace(&base, to.as_str()).into_owned()
                            }
                        });
                    }
                }
                (result, *lowercase)
            }
        };

        if let Some(name) = &result {
            if mechanism == RuleMechanism::Hadoop && name.contains(['/', '@']) {
                return Err(error::negotiate(format!(
                    "Non-simple name {name} after auth_to_local rule {self}"
                )));
            }
        }
        Ok(if lowercase {
            result.map(|r| r.to_lowercase())
        } else {
            result
        })
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Default => f.write_str("DEFAULT"),
            Rule::Mapping {
                components,
                format,
                matcher,
                substitution,
                lowercase,
            } => {
                write!(f, "RULE:[{components}:{format}]")?;
                if let Some(m) = matcher {
                    let pattern = m.as_str();
                    let pattern = pattern
                        .strip_prefix("^(?:")
                        .and_then(|p| p.strip_suffix(")$"))
                        .unwrap_or(pattern);
                    write!(f, "({pattern})")?;
                }
                if let Some((from, to, global)) = substitution {
                    write!(f, "s/{}/{to}/", from.as_str())?;
                    if *global {
                        f.write_str("g")?;
                    }
                }
                if *lowercase {
                    f.write_str("/L")?;
                }
                Ok(())
            }
        }
    }
}

fn replace_parameters(format: &str, params: &[&str]) -> Result<String> {
    let mut result = String::new();
    for caps in parameter_parser().captures_iter(format) {
        result.push_str(&caps[1]);
        if let Some(num) = caps.get(3) {
            let index: usize = num.as_str().parse().map_err(|_| {
                error::configuration(format!("bad format in username mapping in {format}"))
            })?;
            let param = params.get(index).ok_or_else(|| {
                error::configuration(format!(
                    "index {index} from {format} is outside of the valid range 0 to {}",
                    params.len() - 1
                ))
            })?;
            result.push_str(param);
        }
    }
    Ok(result)
}

/// An immutable, ordered set of short-name rules.
#[derive(Debug, Clone)]
pub struct NameRules {
    rules: Vec<Rule>,
    mechanism: RuleMechanism,
    default_realm: Option<String>,
}

impl NameRules {
    pub fn parse(rules: &str) -> Result<Self> {
        let mut parsed = Vec::new();
        let mut remaining = rules.trim();
        while !remaining.is_empty() {
            let caps = rule_parser()
                .captures(remaining)
                .ok_or_else(|| error::configuration(format!("Invalid rule: {remaining}")))?;
            let rule = if caps.get(2).is_some() {
                Rule::Default
            } else {
                let components = caps[4].parse().map_err(|_| {
                    error::configuration(format!("Invalid rule: {remaining}"))
                })?;
                let matcher = caps
                    .get(7)
                    .map(|m| compile(&format!("^(?:{})$", m.as_str())))
                    .transpose()?;
                let substitution = match caps.get(9) {
                    Some(from) => Some((
                        compile(from.as_str())?,
                        caps.get(10).map_or("", |m| m.as_str()).to_owned(),
                        caps.get(11).is_some(),
                    )),
                    None => None,
                };
                Rule::Mapping {
                    components,
                    format: caps[5].to_owned(),
                    matcher,
                    substitution,
                    lowercase: caps.get(12).is_some(),
                }
            };
            parsed.push(rule);
            let end = caps.get(0).map_or(remaining.len(), |m| m.end());
            remaining = remaining[end..].trim_start();
        }
        Ok(NameRules {
            rules: parsed,
            mechanism: RuleMechanism::default(),
            default_realm: None,
        })
    }

    pub fn with_mechanism(mut self, mechanism: RuleMechanism) -> Self {
        self.mechanism = mechanism;
        self
    }

    /// The realm the `DEFAULT` rule strips.
    pub fn with_default_realm(mut self, realm: impl Into<String>) -> Self {
        self.default_realm = Some(realm.into());
        self
    }

    pub fn mechanism(&self) -> RuleMechanism {
        self.mechanism
    }

    pub fn default_realm(&self) -> Option<&str> {
        self.default_realm.as_deref()
    }

    /// Maps `name` to a local user name with the first rule that applies.
    pub fn short_name(&self, name: &KerberosName) -> Result<String> {
        let params: Vec<&str> = match (&name.realm, &name.host) {
            (None, None) => return Ok(name.service.clone()),
            (realm, None) => vec![realm.as_deref().unwrap_or_default(), name.service.as_str()],
            (realm, Some(host)) => vec![
                realm.as_deref().unwrap_or_default(),
                name.service.as_str(),
                host.as_str(),
            ],
        };
        for rule in &self.rules {
            if let Some(short) = rule.apply(&params, self.mechanism, self.default_realm())? {
                return Ok(short);
            }
        }
        match self.mechanism {
            RuleMechanism::Hadoop => Err(error::negotiate(format!("No rules applied to {name}"))),
            RuleMechanism::Mit => Ok(name.to_string()),
        }
    }
}

impl Default for NameRules {
    fn default() -> Self {
        NameRules {
            rules: vec![Rule::Default],
            mechanism: RuleMechanism::default(),
            default_realm: None,
        }
    }
}

impl fmt::Display for NameRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rule) in self.rules.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{rule}")?;
        }
        Ok(())
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| error::configuration(format!("Invalid rule pattern: {e}")))
}
