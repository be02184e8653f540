//! Per-class index extraction.

use std::collections::{HashMap, HashSet};

use crate::classfile::{descriptor_classes, ClassFile, CodeRef, MemberKind};
use crate::common::is_inner_class;
use crate::error::Result;

use super::hierarchy::ClassDataEntry;
use super::reference::{ReferenceKey, ReferenceSite};

/// The share of the index one indexing worker accumulates.
#[derive(Debug, Default)]
pub struct PartialIndex {
    /// key string -> site strings
    references: HashMap<String, Vec<String>>,
    class_data: Vec<ClassDataEntry>,
    classes_indexed: usize,
}

impl PartialIndex {
    pub fn reference(&self, key: &str) -> &[String] {
        self.references.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct (key, site) pairs.
    pub fn reference_count(&self) -> usize {
        self.references.values().map(Vec::len).sum()
    }

    pub fn class_data(&self) -> &[ClassDataEntry] {
        &self.class_data
    }

    pub fn classes_indexed(&self) -> usize {
        self.classes_indexed
    }

    /// Parse one class and record its class data and outgoing references.
    pub fn index_class(&mut self, bytes: &[u8]) -> Result<()> {
        let class = ClassFile::parse(bytes)?;
        let name = class.name()?;
        let mut usages = Usages { this: name, seen: HashSet::new(), out: Vec::new() };

        let header = ReferenceSite::class(name);
        let super_name = class.super_name()?;
        let interfaces = class.interface_names()?;
        for parent in super_name.iter().chain(interfaces.iter()) {
            usages.class(parent, &header);
        }

        for field in &class.fields {
            let fname = class.member_name(field)?;
            let desc = class.member_descriptor(field)?;
            let site = ReferenceSite::field(name, fname, desc);
            for used in descriptor_classes(desc) {
                usages.class(used, &site);
            }
        }

        for method in &class.methods {
            let mname = class.member_name(method)?;
            let desc = class.member_descriptor(method)?;
            let site = ReferenceSite::method(name, mname, desc);
            for used in descriptor_classes(desc) {
                usages.class(used, &site);
            }
            let Some(code) = class.code(method)? else { continue };
            for reference in class.code_references(&code.code)? {
                match reference {
                    CodeRef::Member(m) => {
                        usages.class(m.owner, &site);
                        let key = match m.kind {
                            MemberKind::Method => ReferenceKey::method(m.owner, m.name, m.descriptor),
                            MemberKind::Field => ReferenceKey::field(m.owner, m.name, m.descriptor),
                        };
                        usages.add(key.to_string(), &site);
                    }
                    CodeRef::Class(c) => usages.class(c, &site),
                }
            }
        }

        for (key, site) in usages.out {
            self.references.entry(key).or_default().push(site);
        }
        if !is_inner_class(name) {
            self.class_data.push(ClassDataEntry {
                class_name: name.to_string(),
                super_name: super_name.map(str::to_string),
                access_flags: class.access_flags,
                interfaces: interfaces.iter().map(|s| s.to_string()).collect(),
            });
        }
        self.classes_indexed += 1;
        Ok(())
    }
}

/// Usages of one class, deduplicated.
struct Usages<'a> {
    this: &'a str,
    seen: HashSet<(String, String)>,
    out: Vec<(String, String)>,
}

impl Usages<'_> {
    fn class(&mut self, used: &str, site: &ReferenceSite) {
        // A class mentioning itself is not a usage worth listing.
        if used != self.this {
            self.add(used.to_string(), site);
        }
    }

    fn add(&mut self, key: String, site: &ReferenceSite) {
        let pair = (key, site.to_string());
        if self.seen.insert(pair.clone()) {
            self.out.push(pair);
        }
    }
}
