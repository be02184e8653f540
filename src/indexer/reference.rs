//! Reference keys and reference-site strings.
//!
//! A key names the symbol being looked up: `pkg/Name` for a class, or
//! `owner:name:descriptor` for a member (a method when the descriptor has a
//! parameter list). A site names where a usage occurs: `c:<class>` for the
//! class header, `f:<owner>:<name>:<desc>` for a field declaration and
//! `m:<owner>:<name>:<desc>` for a method body or signature.

use std::fmt;
use std::str::FromStr;

use crate::error::{JarlensError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    Class,
    Method,
    Field,
}

/// The symbol a reference lookup is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReferenceKey {
    Class(String),
    Method { owner: String, name: String, descriptor: String },
    Field { owner: String, name: String, descriptor: String },
}

impl ReferenceKey {
    pub fn class(name: impl Into<String>) -> Self {
        ReferenceKey::Class(name.into())
    }

    pub fn method(owner: impl Into<String>, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        ReferenceKey::Method { owner: owner.into(), name: name.into(), descriptor: descriptor.into() }
    }

    pub fn field(owner: impl Into<String>, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        ReferenceKey::Field { owner: owner.into(), name: name.into(), descriptor: descriptor.into() }
    }

    pub fn query_type(&self) -> QueryType {
        match self {
            ReferenceKey::Class(_) => QueryType::Class,
            ReferenceKey::Method { .. } => QueryType::Method,
            ReferenceKey::Field { .. } => QueryType::Field,
        }
    }

    /// Internal name of the class, or of the member's owner.
    pub fn owner(&self) -> &str {
        match self {
            ReferenceKey::Class(name) => name,
            ReferenceKey::Method { owner, .. } | ReferenceKey::Field { owner, .. } => owner,
        }
    }

    /// Member name; `None` for a class key.
    pub fn member_name(&self) -> Option<&str> {
        match self {
            ReferenceKey::Class(_) => None,
            ReferenceKey::Method { name, .. } | ReferenceKey::Field { name, .. } => Some(name),
        }
    }

    pub fn descriptor(&self) -> Option<&str> {
        match self {
            ReferenceKey::Class(_) => None,
            ReferenceKey::Method { descriptor, .. } | ReferenceKey::Field { descriptor, .. } => Some(descriptor),
        }
    }
}

/// Classify a raw key string without fully parsing it.
pub fn query_type(key: &str) -> QueryType {
    if !key.contains(':') {
        return QueryType::Class;
    }
    match key.split(':').nth(2) {
        Some(desc) if desc.contains('(') => QueryType::Method,
        _ => QueryType::Field,
    }
}

impl FromStr for ReferenceKey {
    type Err = JarlensError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(JarlensError::Config("empty reference key".into()));
        }
        let parts: Vec<&str> = s.splitn(3, ':').collect();
        match parts.as_slice() {
            [class] => Ok(ReferenceKey::class(*class)),
            [owner, name, desc] if !owner.is_empty() && !name.is_empty() && !desc.is_empty() => {
                if desc.contains('(') {
                    Ok(ReferenceKey::method(*owner, *name, *desc))
                } else {
                    Ok(ReferenceKey::field(*owner, *name, *desc))
                }
            }
            _ => Err(JarlensError::Config(format!("malformed reference key '{s}'"))),
        }
    }
}

impl fmt::Display for ReferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKey::Class(name) => f.write_str(name),
            ReferenceKey::Method { owner, name, descriptor } | ReferenceKey::Field { owner, name, descriptor } => {
                write!(f, "{owner}:{name}:{descriptor}")
            }
        }
    }
}

/// Where a usage occurs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReferenceSite {
    Class(String),
    Method { owner: String, name: String, descriptor: String },
    Field { owner: String, name: String, descriptor: String },
}

impl ReferenceSite {
    pub fn class(name: &str) -> Self {
        ReferenceSite::Class(name.to_string())
    }

    pub fn method(owner: &str, name: &str, descriptor: &str) -> Self {
        ReferenceSite::Method { owner: owner.to_string(), name: name.to_string(), descriptor: descriptor.to_string() }
    }

    pub fn field(owner: &str, name: &str, descriptor: &str) -> Self {
        ReferenceSite::Field { owner: owner.to_string(), name: name.to_string(), descriptor: descriptor.to_string() }
    }

    /// The class whose source contains this site.
    pub fn owner(&self) -> &str {
        match self {
            ReferenceSite::Class(name) => name,
            ReferenceSite::Method { owner, .. } | ReferenceSite::Field { owner, .. } => owner,
        }
    }
}

impl FromStr for ReferenceSite {
    type Err = JarlensError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || JarlensError::Config(format!("malformed reference site '{s}'"));
        let (tag, rest) = s.split_once(':').ok_or_else(malformed)?;
        if tag == "c" {
            return if rest.is_empty() { Err(malformed()) } else { Ok(ReferenceSite::class(rest)) };
        }
        let parts: Vec<&str> = rest.splitn(3, ':').collect();
        let [owner, name, desc] = parts.as_slice() else {
            return Err(malformed());
        };
        match tag {
            "m" => Ok(ReferenceSite::method(owner, name, desc)),
            "f" => Ok(ReferenceSite::field(owner, name, desc)),
            _ => Err(malformed()),
        }
    }
}

impl fmt::Display for ReferenceSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceSite::Class(name) => write!(f, "c:{name}"),
            ReferenceSite::Method { owner, name, descriptor } => write!(f, "m:{owner}:{name}:{descriptor}"),
            ReferenceSite::Field { owner, name, descriptor } => write!(f, "f:{owner}:{name}:{descriptor}"),
        }
    }
}

fn simple_name(class: &str) -> &str {
    class.rsplit('/').next().unwrap_or(class)
}

/// Display form of a site string: `name(desc)` for a method, the field name
/// for a field, the class name for a class-level usage.
pub fn format_reference(site: &str) -> String {
    match site.parse::<ReferenceSite>() {
        Ok(ReferenceSite::Class(name)) => name,
        Ok(ReferenceSite::Method { name, descriptor, .. }) => format!("{name}{descriptor}"),
        Ok(ReferenceSite::Field { name, .. }) => name,
        Err(_) => site.to_string(),
    }
}

/// Heading for a lookup: `Simple`, `Simple.name(desc)` or `Simple.name`.
pub fn format_reference_query(key: &str) -> String {
    match key.parse::<ReferenceKey>() {
        Ok(ReferenceKey::Class(name)) => simple_name(&name).to_string(),
        Ok(ReferenceKey::Method { owner, name, descriptor }) => {
            format!("{}.{name}{descriptor}", simple_name(&owner))
        }
        Ok(ReferenceKey::Field { owner, name, .. }) => format!("{}.{name}", simple_name(&owner)),
        Err(_) => key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_classification() {
        assert_eq!(query_type("a/b/C"), QueryType::Class);
        assert_eq!(query_type("a/b/C:run:()V"), QueryType::Method);
        assert_eq!(query_type("a/b/C:count:I"), QueryType::Field);

        let key: ReferenceKey = "a/b/C:run:()V".parse().unwrap();
        assert_eq!(key, ReferenceKey::method("a/b/C", "run", "()V"));
        assert_eq!(key.to_string(), "a/b/C:run:()V");
        assert!("a/b/C:run".parse::<ReferenceKey>().is_err());
        assert!("".parse::<ReferenceKey>().is_err());
    }

    #[test]
    fn sites_parse_and_print() {
        for s in ["c:a/B", "m:a/B:go:(I)V", "f:a/B:x:Ljava/lang/String;"] {
            assert_eq!(s.parse::<ReferenceSite>().unwrap().to_string(), s);
        }
        assert!("x:a/B".parse::<ReferenceSite>().is_err());
        assert!("m:a/B:go".parse::<ReferenceSite>().is_err());
    }

    #[test]
    fn formatting() {
        assert_eq!(format_reference("m:a/B:go:(I)V"), "go(I)V");
        assert_eq!(format_reference("f:a/B:x:I"), "x");
        assert_eq!(format_reference("c:a/B"), "a/B");

        assert_eq!(format_reference_query("a/b/Cls"), "Cls");
        assert_eq!(format_reference_query("a/b/Cls:go:(I)V"), "Cls.go(I)V");
        assert_eq!(format_reference_query("a/b/Cls:x:I"), "Cls.x");
    }
}
