// src/krb/mod.rs

//! Kerberos helpers that need no GSS library: reading the target principal
//! out of a negotiation token and mapping principals to local user names.

pub mod der;
pub mod name;

pub use self::der::token_server_name;
pub use self::name::{KerberosName, NameRules, RuleMechanism};
