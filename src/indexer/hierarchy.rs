//! Class data table and the inheritance graph built from it.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::classfile::{ACC_ABSTRACT, ACC_ANNOTATION, ACC_ENUM, ACC_FINAL, ACC_INTERFACE};
use crate::error::{JarlensError, Result};

const ACC_MODULE: u16 = 0x8000;

/// Superclass, access flags and interfaces of one class.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClassDataEntry {
    pub class_name: String,
    pub super_name: Option<String>,
    pub access_flags: u16,
    pub interfaces: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    Annotation,
    Interface,
    Enum,
    Exception,
    Record,
    Abstract,
    Final,
    Class,
    /// `package-info` and `module-info`.
    Meta,
}

impl ClassKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ClassKind::Annotation => "annotation",
            ClassKind::Interface => "interface",
            ClassKind::Enum => "enum",
            ClassKind::Exception => "exception",
            ClassKind::Record => "record",
            ClassKind::Abstract => "abstract",
            ClassKind::Final => "final",
            ClassKind::Class => "class",
            ClassKind::Meta => "meta",
        }
    }
}

impl fmt::Display for ClassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const THROWABLES: [&str; 4] = ["java/lang/Throwable", "java/lang/Exception", "java/lang/RuntimeException", "java/lang/Error"];

impl ClassDataEntry {
    pub fn simple_name(&self) -> &str {
        self.class_name.rsplit('/').next().unwrap_or(&self.class_name)
    }

    /// Classification from flags and the direct superclass only; see
    /// [`ClassHierarchy::kind_of`] for one that follows the whole chain.
    pub fn kind(&self) -> ClassKind {
        let simple = self.simple_name();
        if simple == "package-info" || simple == "module-info" || self.access_flags & ACC_MODULE != 0 {
            return ClassKind::Meta;
        }
        if self.access_flags & ACC_ANNOTATION != 0 {
            return ClassKind::Annotation;
        }
        if self.access_flags & ACC_INTERFACE != 0 {
            return ClassKind::Interface;
        }
        match self.super_name.as_deref() {
            Some("java/lang/Enum") => return ClassKind::Enum,
            Some("java/lang/Record") => return ClassKind::Record,
            Some(s) if THROWABLES.contains(&s) => return ClassKind::Exception,
            _ => {}
        }
        if self.access_flags & ACC_ENUM != 0 {
            return ClassKind::Enum;
        }
        if self.access_flags & ACC_ABSTRACT != 0 {
            ClassKind::Abstract
        } else if self.access_flags & ACC_FINAL != 0 {
            ClassKind::Final
        } else {
            ClassKind::Class
        }
    }
}

/// `className|superName|accessFlags|iface1,iface2`
impl fmt::Display for ClassDataEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.class_name,
            self.super_name.as_deref().unwrap_or(""),
            self.access_flags,
            self.interfaces.join(",")
        )
    }
}

impl FromStr for ClassDataEntry {
    type Err = JarlensError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('|').collect();
        let [class_name, super_name, flags, interfaces] = parts.as_slice() else {
            return Err(JarlensError::Store(format!("malformed class data '{s}'")));
        };
        let access_flags =
            flags.parse().map_err(|_| JarlensError::Store(format!("bad access flags in class data '{s}'")))?;
        Ok(ClassDataEntry {
            class_name: class_name.to_string(),
            super_name: (!super_name.is_empty()).then(|| super_name.to_string()),
            access_flags,
            interfaces: interfaces.split(',').filter(|i| !i.is_empty()).map(str::to_string).collect(),
        })
    }
}

/// Direct super/sub-type relations over one class data table.
#[derive(Debug, Default)]
pub struct ClassHierarchy {
    entries: HashMap<String, ClassDataEntry>,
    children: HashMap<String, BTreeSet<String>>,
}

impl ClassHierarchy {
    pub fn new(entries: &[ClassDataEntry]) -> Self {
        let mut hierarchy = ClassHierarchy::default();
        for entry in entries {
            for parent in entry.super_name.iter().chain(&entry.interfaces) {
                hierarchy.children.entry(parent.clone()).or_default().insert(entry.class_name.clone());
            }
            hierarchy.entries.insert(entry.class_name.clone(), entry.clone());
        }
        hierarchy
    }

    pub fn get(&self, name: &str) -> Option<&ClassDataEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Superclass and interfaces, sorted. Classes outside the table have
    /// no known parents.
    pub fn parents(&self, name: &str) -> Vec<String> {
        let Some(entry) = self.entries.get(name) else { return Vec::new() };
        let mut parents: Vec<String> = entry.super_name.iter().chain(&entry.interfaces).cloned().collect();
        parents.sort();
        parents.dedup();
        parents
    }

    /// Direct subtypes (subclasses and implementors), sorted.
    pub fn children(&self, name: &str) -> Vec<String> {
        self.children.get(name).map(|c| c.iter().cloned().collect()).unwrap_or_default()
    }

    /// Every transitive supertype reachable through the table, nearest first.
    pub fn ancestors(&self, name: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<String> = self.parents(name).into();
        let mut out = Vec::new();
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            queue.extend(self.parents(&next));
            out.push(next);
        }
        out
    }

    /// Like [`ClassDataEntry::kind`], but a class is an exception when any
    /// superclass in the table extends a throwable.
    pub fn kind_of(&self, name: &str) -> Option<ClassKind> {
        let entry = self.entries.get(name)?;
        let kind = entry.kind();
        if kind != ClassKind::Class && kind != ClassKind::Abstract && kind != ClassKind::Final {
            return Some(kind);
        }
        let mut seen = HashSet::new();
        let mut current = entry.super_name.as_deref();
        while let Some(sup) = current {
            if THROWABLES.contains(&sup) {
                return Some(ClassKind::Exception);
            }
            if !seen.insert(sup) {
                break;
            }
            current = self.entries.get(sup).and_then(|e| e.super_name.as_deref());
        }
        Some(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, sup: Option<&str>, flags: u16, ifaces: &[&str]) -> ClassDataEntry {
        ClassDataEntry {
            class_name: name.into(),
            super_name: sup.map(Into::into),
            access_flags: flags,
            interfaces: ifaces.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn pipe_format() {
        let e = entry("a/B", Some("java/lang/Object"), 33, &["a/I", "a/J"]);
        let s = e.to_string();
        assert_eq!(s, "a/B|java/lang/Object|33|a/I,a/J");
        assert_eq!(s.parse::<ClassDataEntry>().unwrap(), e);

        let root: ClassDataEntry = "java/lang/Object||33|".parse().unwrap();
        assert_eq!(root.super_name, None);
        assert!(root.interfaces.is_empty());
        assert!("a|b".parse::<ClassDataEntry>().is_err());
    }

    #[test]
    fn kinds() {
        assert_eq!(entry("a/A", None, ACC_INTERFACE | ACC_ANNOTATION, &[]).kind(), ClassKind::Annotation);
        assert_eq!(entry("a/I", None, ACC_INTERFACE | ACC_ABSTRACT, &[]).kind(), ClassKind::Interface);
        assert_eq!(entry("a/E", Some("java/lang/Enum"), ACC_FINAL, &[]).kind(), ClassKind::Enum);
        assert_eq!(entry("a/R", Some("java/lang/Record"), ACC_FINAL, &[]).kind(), ClassKind::Record);
        assert_eq!(entry("a/X", Some("java/lang/RuntimeException"), 0, &[]).kind(), ClassKind::Exception);
        assert_eq!(entry("a/package-info", None, ACC_INTERFACE, &[]).kind(), ClassKind::Meta);
        assert_eq!(entry("a/F", Some("java/lang/Object"), ACC_FINAL, &[]).kind(), ClassKind::Final);
        assert_eq!(entry("a/C", Some("java/lang/Object"), 0, &[]).kind(), ClassKind::Class);
    }

    #[test]
    fn parents_children_and_ancestors() {
        let table = vec![
            entry("a/Base", Some("java/lang/Object"), ACC_ABSTRACT, &["a/I"]),
            entry("a/Mid", Some("a/Base"), 0, &[]),
            entry("a/Leaf", Some("a/Mid"), 0, &["a/I"]),
            entry("a/Oops", Some("java/lang/Exception"), 0, &[]),
            entry("a/Worse", Some("a/Oops"), 0, &[]),
        ];
        let h = ClassHierarchy::new(&table);
        assert_eq!(h.parents("a/Leaf"), vec!["a/I", "a/Mid"]);
        assert_eq!(h.children("a/I"), vec!["a/Base", "a/Leaf"]);
        assert_eq!(h.children("a/Base"), vec!["a/Mid"]);
        assert!(h.children("a/Leaf").is_empty());
        assert_eq!(h.ancestors("a/Leaf"), vec!["a/I", "a/Mid", "a/Base", "java/lang/Object"]);
        assert_eq!(h.kind_of("a/Worse"), Some(ClassKind::Exception));
        assert_eq!(h.kind_of("a/Mid"), Some(ClassKind::Class));
        assert_eq!(h.kind_of("missing"), None);
    }
}
