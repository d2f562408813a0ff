use crate::core::error::MigrationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv6Addr;

/// A user as seen by the legacy columns: numeric id (0 for anonymous/IP users)
/// plus the user name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: u64,
    pub name: String,
}

impl UserIdentity {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn anonymous(name: impl Into<String>) -> Self {
        Self::new(0, name)
    }

    pub fn is_registered(&self) -> bool {
        self.id != 0
    }

    /// The name as every representation stores it: trimmed, with IP addresses
    /// in canonical form.
    pub fn canonical_name(&self) -> String {
        sanitize_ip(&self.name)
    }

    /// The id as an SQL integer. Ids above `i64::MAX` cannot be stored.
    pub fn sql_id(&self) -> Result<i64, MigrationError> {
        i64::try_from(self.id).map_err(|_| {
            MigrationError::UsageError(format!(
                "user id {} of '{}' does not fit a signed 64-bit column",
                self.id, self.name
            ))
        })
    }
}

/// Stable handle of a row in the `actor` table. Issued only by an
/// [`ActorNormalization`](crate::core::actor::ActorNormalization) implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub i64);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The `users` argument of a membership predicate.
#[derive(Debug, Clone, Copy, Default)]
pub enum UserSelection<'a> {
    #[default]
    None,
    One(&'a UserIdentity),
    Many(&'a [UserIdentity]),
}

impl<'a> UserSelection<'a> {
    pub fn as_slice(&self) -> &'a [UserIdentity] {
        match *self {
            UserSelection::None => &[],
            UserSelection::One(user) => std::slice::from_ref(user),
            UserSelection::Many(users) => users,
        }
    }
}

impl<'a> From<&'a UserIdentity> for UserSelection<'a> {
    fn from(user: &'a UserIdentity) -> Self {
        UserSelection::One(user)
    }
}

impl<'a> From<&'a [UserIdentity]> for UserSelection<'a> {
    fn from(users: &'a [UserIdentity]) -> Self {
        UserSelection::Many(users)
    }
}

impl<'a> From<&'a Vec<UserIdentity>> for UserSelection<'a> {
    fn from(users: &'a Vec<UserIdentity>) -> Self {
        UserSelection::Many(users.as_slice())
    }
}

impl<'a, const N: usize> From<&'a [UserIdentity; N]> for UserSelection<'a> {
    fn from(users: &'a [UserIdentity; N]) -> Self {
        UserSelection::Many(users.as_slice())
    }
}

impl<'a> From<Option<&'a UserIdentity>> for UserSelection<'a> {
    fn from(user: Option<&'a UserIdentity>) -> Self {
        user.map_or(UserSelection::None, UserSelection::One)
    }
}

/// Canonical form of a user name as stored in legacy `_text` columns.
///
/// Names that are not IP addresses are only trimmed. IPv4 octets lose leading
/// zeros; IPv6 addresses are fully expanded, upper-cased, with leading zeros
/// dropped from each group (`2001:db8::1` -> `2001:DB8:0:0:0:0:0:1`).
pub fn sanitize_ip(name: &str) -> String {
    let name = name.trim();
    if let Some(v4) = sanitize_ipv4(name) {
        return v4;
    }
    if let Ok(v6) = name.parse::<Ipv6Addr>() {
        return v6
            .segments()
            .iter()
            .map(|seg| format!("{seg:X}"))
            .collect::<Vec<_>>()
            .join(":");
    }
    name.to_string()
}

fn sanitize_ipv4(name: &str) -> Option<String> {
    let octets: Vec<&str> = name.split('.').collect();
    if octets.len() != 4 {
        return None;
    }
    let mut out = Vec::with_capacity(4);
    for octet in octets {
        if octet.is_empty() || octet.len() > 3 || !octet.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let value: u16 = octet.parse().ok()?;
        if value > 255 {
            return None;
        }
        out.push(value.to_string());
    }
    Some(out.join("."))
}
