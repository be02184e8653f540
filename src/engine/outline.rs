//! Built-in portable engine.
//!
//! Produces a Java outline of each unit: package, imports, the class header,
//! field and method declarations, and method bodies reduced to the members and
//! classes they touch. Every named element is reported as a [`Token`] so
//! navigation works on outline output the same way it does on real
//! decompiler output.
//!
//! Recognised options: `indent` (spaces per level, default 4) and
//! `hide-synthetic` (`true` drops synthetic members).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;

use crate::classfile::{self, ClassFile, CodeRef, Constant, MemberInfo, MemberKind};
use crate::classfile::{
    ACC_ABSTRACT, ACC_ANNOTATION, ACC_ENUM, ACC_FINAL, ACC_INTERFACE, ACC_NATIVE, ACC_PRIVATE, ACC_PROTECTED,
    ACC_PUBLIC, ACC_STATIC, ACC_SYNCHRONIZED, ACC_SYNTHETIC, ACC_TRANSIENT, ACC_VOLATILE,
};
use crate::common::{outer_class, Token, TokenKind};
use crate::engine::{DecompileRequest, Engine, EngineFactory, EngineVariant};
use crate::error::{JarlensError, Result};

pub struct OutlineEngineFactory;

impl EngineFactory for OutlineEngineFactory {
    fn load(&self, variant: EngineVariant) -> Result<Box<dyn Engine>> {
        match variant {
            EngineVariant::Portable => Ok(Box::new(OutlineEngine::default())),
            EngineVariant::Native => Err(JarlensError::EngineLoad {
                variant,
                reason: "the built-in engine has no native build".to_string(),
            }),
        }
    }
}

#[derive(Default)]
pub struct OutlineEngine {
    indent: usize,
    hide_synthetic: bool,
    units_rendered: u64,
}

impl OutlineEngine {
    pub fn units_rendered(&self) -> u64 {
        self.units_rendered
    }
}

enum FieldType {
    Primitive(&'static str),
    Object(String),
}

/// One field type of a descriptor plus its array depth; returns the rest.
fn split_field_type(desc: &str) -> Option<(FieldType, usize, &str)> {
    let dims = desc.bytes().take_while(|&b| b == b'[').count();
    let rest = &desc[dims..];
    let prim = match rest.as_bytes().first()? {
        b'B' => "byte",
        b'C' => "char",
        b'D' => "double",
        b'F' => "float",
        b'I' => "int",
        b'J' => "long",
        b'S' => "short",
        b'Z' => "boolean",
        b'V' => "void",
        b'L' => {
            let end = rest.find(';')?;
            return Some((FieldType::Object(rest[1..end].to_string()), dims, &rest[end + 1..]));
        }
        _ => return None,
    };
    Some((FieldType::Primitive(prim), dims, &rest[1..]))
}

fn package_of(name: &str) -> &str {
    name.rfind('/').map(|i| &name[..i]).unwrap_or("")
}

fn simple_of(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// How each referenced class is spelled in one unit, plus the imports needed.
struct TypeNames {
    spelling: HashMap<String, String>,
    imports: BTreeSet<String>,
}

impl TypeNames {
    fn build(unit: &str, referenced: &BTreeSet<String>) -> Self {
        let package = package_of(unit);
        let mut claimed: HashMap<String, String> = HashMap::new();
        claimed.insert(simple_of(unit).to_string(), unit.to_string());

        let mut spelling = HashMap::new();
        let mut imports = BTreeSet::new();
        for name in referenced {
            let outer = outer_class(name);
            let simple_outer = simple_of(outer);
            let nested = name[outer.len()..].replace('$', ".");
            let pkg = package_of(outer);

            let implicit = outer == unit || pkg == package || pkg == "java/lang";
            let spelled = if implicit {
                claimed.entry(simple_outer.to_string()).or_insert_with(|| outer.to_string());
                format!("{simple_outer}{nested}")
            } else {
                match claimed.get(simple_outer) {
                    Some(owner) if owner != outer => format!("{}{nested}", outer.replace('/', ".")),
                    _ => {
                        claimed.insert(simple_outer.to_string(), outer.to_string());
                        imports.insert(outer.replace('/', "."));
                        format!("{simple_outer}{nested}")
                    }
                }
            };
            spelling.insert(name.clone(), spelled);
        }
        TypeNames { spelling, imports }
    }

    fn of<'a>(&'a self, name: &'a str) -> &'a str {
        self.spelling.get(name).map(String::as_str).unwrap_or(name)
    }
}

/// Text plus the tokens pointing into it.
struct Emitter {
    out: String,
    tokens: Vec<Token>,
    indent: usize,
}

impl Emitter {
    fn text(&mut self, s: &str) {
        self.out.push_str(s);
    }

    fn pad(&mut self, depth: usize) {
        for _ in 0..depth * self.indent {
            self.out.push(' ');
        }
    }

    fn class_ref(&mut self, types: &TypeNames, name: &str, declaration: bool) {
        let spelled = types.of(name);
        self.tokens.push(Token::class(self.out.len(), spelled.len(), name, declaration));
        self.out.push_str(spelled);
    }

    fn member(&mut self, kind: TokenKind, text: &str, owner: &str, declaration: bool, name: &str, desc: &str) {
        self.tokens.push(Token::member(kind, self.out.len(), text.len(), owner, declaration, name, desc));
        self.out.push_str(text);
    }

    /// Writes a field type; returns false when the descriptor is malformed.
    fn field_type(&mut self, types: &TypeNames, desc: &str) -> bool {
        match split_field_type(desc) {
            Some((ty, dims, _)) => {
                match ty {
                    FieldType::Primitive(p) => self.text(p),
                    FieldType::Object(name) => self.class_ref(types, &name, false),
                }
                for _ in 0..dims {
                    self.text("[]");
                }
                true
            }
            None => {
                self.text(desc);
                false
            }
        }
    }
}

fn class_modifiers(flags: u16) -> String {
    let mut out = String::new();
    if flags & ACC_PUBLIC != 0 {
        out.push_str("public ");
    }
    if flags & ACC_INTERFACE == 0 {
        if flags & ACC_ABSTRACT != 0 {
            out.push_str("abstract ");
        }
        if flags & ACC_FINAL != 0 && flags & ACC_ENUM == 0 {
            out.push_str("final ");
        }
    }
    out.push_str(if flags & ACC_ANNOTATION != 0 {
        "@interface "
    } else if flags & ACC_INTERFACE != 0 {
        "interface "
    } else if flags & ACC_ENUM != 0 {
        "enum "
    } else {
        "class "
    });
    out
}

fn member_modifiers(flags: u16, method: bool, in_interface: bool) -> String {
    let mut table: Vec<(u16, &str)> =
        vec![(ACC_PUBLIC, "public"), (ACC_PRIVATE, "private"), (ACC_PROTECTED, "protected"), (ACC_STATIC, "static")];
    if method {
        if !in_interface {
            table.push((ACC_ABSTRACT, "abstract"));
        }
        table.extend([(ACC_FINAL, "final"), (ACC_SYNCHRONIZED, "synchronized"), (ACC_NATIVE, "native")]);
    } else {
        table.extend([(ACC_FINAL, "final"), (ACC_VOLATILE, "volatile"), (ACC_TRANSIENT, "transient")]);
    }
    let mut out = String::new();
    for (bit, word) in table {
        if flags & bit != 0 {
            out.push_str(word);
            out.push(' ');
        }
    }
    out
}

fn collect_referenced(cf: &ClassFile, into: &mut BTreeSet<String>) -> Result<()> {
    into.insert(cf.name()?.to_string());
    if let Some(s) = cf.super_name()? {
        into.insert(s.to_string());
    }
    for i in cf.interface_names()? {
        into.insert(i.to_string());
    }
    for member in cf.fields.iter().chain(&cf.methods) {
        for c in classfile::descriptor_classes(cf.member_descriptor(member)?) {
            into.insert(c.to_string());
        }
    }
    for method in &cf.methods {
        let Some(code) = cf.code(method)? else { continue };
        // Unreadable bodies are reported while rendering.
        for r in cf.code_references(&code.code).unwrap_or_default() {
            match r {
                CodeRef::Member(m) => {
                    into.insert(m.owner.to_string());
                }
                CodeRef::Class(c) => {
                    into.insert(c.to_string());
                }
            }
        }
    }
    Ok(())
}

impl OutlineEngine {
    fn render_class(
        &self,
        em: &mut Emitter,
        types: &TypeNames,
        cf: &ClassFile,
        depth: usize,
        logger: &mut dyn crate::engine::DecompileLogger,
    ) -> Result<()> {
        let name = cf.name()?;
        let flags = cf.access_flags;
        let is_interface = flags & ACC_INTERFACE != 0;

        em.pad(depth);
        em.text(&class_modifiers(flags));
        let display = name.rsplit(['/', '$']).next().unwrap_or(name);
        em.tokens.push(Token::class(em.out.len(), display.len(), name, true));
        em.text(display);

        let super_name = cf.super_name()?.filter(|s| {
            !matches!(*s, "java/lang/Object" | "java/lang/Enum" | "java/lang/Record") && !is_interface
        });
        if let Some(s) = super_name {
            em.text(" extends ");
            em.class_ref(types, s, false);
        }
        let interfaces = cf.interface_names()?;
        let interfaces: Vec<&str> = if flags & ACC_ANNOTATION != 0 {
            interfaces.into_iter().filter(|i| *i != "java/lang/annotation/Annotation").collect()
        } else {
            interfaces
        };
        if !interfaces.is_empty() {
            em.text(if is_interface { " extends " } else { " implements " });
            for (i, iface) in interfaces.iter().enumerate() {
                if i > 0 {
                    em.text(", ");
                }
                em.class_ref(types, iface, false);
            }
        }
        em.text(" {\n");

        for field in &cf.fields {
            if self.hide_synthetic && field.access_flags & ACC_SYNTHETIC != 0 {
                continue;
            }
            let fname = cf.member_name(field)?;
            let desc = cf.member_descriptor(field)?;
            em.pad(depth + 1);
            em.text(&member_modifiers(field.access_flags, false, is_interface));
            if !em.field_type(types, desc) {
                logger.on_message(&format!("{name}.{fname}: malformed descriptor {desc}"));
            }
            em.text(" ");
            em.member(TokenKind::Field, fname, name, true, fname, desc);
            em.text(";\n");
        }

        for method in &cf.methods {
            if self.hide_synthetic && method.access_flags & ACC_SYNTHETIC != 0 {
                continue;
            }
            em.text("\n");
            self.render_method(em, types, cf, method, depth + 1, is_interface, display, logger)?;
        }

        em.pad(depth);
        em.text("}\n");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn render_method(
        &self,
        em: &mut Emitter,
        types: &TypeNames,
        cf: &ClassFile,
        method: &MemberInfo,
        depth: usize,
        in_interface: bool,
        display: &str,
        logger: &mut dyn crate::engine::DecompileLogger,
    ) -> Result<()> {
        let owner = cf.name()?;
        let mname = cf.member_name(method)?;
        let desc = cf.member_descriptor(method)?;
        let flags = method.access_flags;

        em.pad(depth);
        if mname == "<clinit>" {
            em.member(TokenKind::Method, "static", owner, true, mname, desc);
        } else {
            em.text(&member_modifiers(flags, true, in_interface));
            let params_desc = desc.strip_prefix('(').unwrap_or(desc);
            let close = params_desc.find(')').unwrap_or(params_desc.len());
            if mname != "<init>" {
                if !em.field_type(types, params_desc.get(close + 1..).unwrap_or("V")) {
                    logger.on_message(&format!("{owner}.{mname}: malformed descriptor {desc}"));
                }
                em.text(" ");
                em.member(TokenKind::Method, mname, owner, true, mname, desc);
            } else {
                em.member(TokenKind::Method, display, owner, true, mname, desc);
            }
            em.text("(");
            let mut rest = &params_desc[..close];
            let mut index = 0;
            while let Some((_, _, after)) = split_field_type(rest) {
                let param_desc = &rest[..rest.len() - after.len()];
                if index > 0 {
                    em.text(", ");
                }
                em.field_type(types, param_desc);
                em.text(" ");
                let pname = format!("arg{index}");
                em.member(TokenKind::Parameter, &pname, owner, true, &pname, param_desc);
                rest = after;
                index += 1;
            }
            em.text(")");
        }

        let code = cf.code(method)?;
        let Some(code) = code else {
            em.text(";\n");
            return Ok(());
        };
        em.text(" {\n");

        match cf.code_references(&code.code) {
            Ok(refs) => {
                let mut seen = BTreeSet::new();
                let mut wrote = false;
                for r in refs {
                    if !seen.insert(format!("{r:?}")) {
                        continue;
                    }
                    em.pad(depth + 1);
                    match r {
                        CodeRef::Member(m) if m.kind == MemberKind::Method && m.name == "<init>" => {
                            em.text("new ");
                            em.class_ref(types, m.owner, false);
                            em.text("(...);\n");
                        }
                        CodeRef::Member(m) => {
                            em.class_ref(types, m.owner, false);
                            em.text(".");
                            if m.kind == MemberKind::Method {
                                em.member(TokenKind::Method, m.name, m.owner, false, m.name, m.descriptor);
                                em.text("(...);\n");
                            } else {
                                em.member(TokenKind::Field, m.name, m.owner, false, m.name, m.descriptor);
                                em.text(";\n");
                            }
                        }
                        CodeRef::Class(c) => {
                            em.class_ref(types, c, false);
                            em.text(".class;\n");
                        }
                    }
                    wrote = true;
                }
                if !wrote {
                    em.pad(depth + 1);
                    em.text("/* compiled code */\n");
                }
            }
            Err(e) => {
                logger.on_message(&format!("{owner}.{mname}{desc}: {e}"));
                em.pad(depth + 1);
                em.text("/* unreadable bytecode */\n");
            }
        }

        em.pad(depth);
        em.text("}\n");
        Ok(())
    }
}

impl Engine for OutlineEngine {
    fn variant(&self) -> EngineVariant {
        EngineVariant::Portable
    }

    fn decompile_many(&mut self, names: &[String], request: DecompileRequest<'_>) -> Result<BTreeMap<String, String>> {
        self.indent = request.options.get("indent").and_then(|v| v.parse::<usize>().ok()).unwrap_or(4).min(16);
        self.hide_synthetic = request.options.get("hide-synthetic").is_some_and(|v| v == "true");

        // unit -> inner classes requested alongside it
        let mut units: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for name in names {
            let unit = units.entry(outer_class(name)).or_default();
            if name.contains('$') {
                unit.push(name);
            }
        }

        let load = |name: &str| -> Result<ClassFile> {
            let bytes = (request.source)(name)
                .ok_or_else(|| JarlensError::Engine(format!("class bytes unavailable: {name}")))?;
            ClassFile::parse(&bytes)
        };

        let mut out = BTreeMap::new();
        for (unit, inner) in units {
            request.logger.on_start_class(unit);
            let outer_cf = load(unit)?;
            let mut inner_cfs = Vec::with_capacity(inner.len());
            for name in inner {
                request.logger.on_start_class(name);
                inner_cfs.push(load(name)?);
            }

            let mut referenced = BTreeSet::new();
            collect_referenced(&outer_cf, &mut referenced)?;
            for cf in &inner_cfs {
                collect_referenced(cf, &mut referenced)?;
            }
            let types = TypeNames::build(unit, &referenced);

            let mut em = Emitter { out: String::new(), tokens: Vec::new(), indent: self.indent.max(1) };
            let package = package_of(unit);
            if !package.is_empty() {
                let _ = writeln!(em.out, "package {};\n", package.replace('/', "."));
            }
            if !types.imports.is_empty() {
                for import in &types.imports {
                    let _ = writeln!(em.out, "import {import};");
                }
                em.out.push('\n');
            }

            self.render_class(&mut em, &types, &outer_cf, 0, &mut *request.logger)?;
            if !inner_cfs.is_empty() {
                // Nested bodies go before the closing brace of the outer class.
                em.out.truncate(em.out.len() - "}\n".len());
                for cf in &inner_cfs {
                    em.text("\n");
                    self.render_class(&mut em, &types, cf, 1, &mut *request.logger)?;
                }
                em.text("}\n");
            }

            for token in em.tokens {
                request.tokens.on_token(unit, token);
            }
            out.insert(unit.to_string(), em.out);
            self.units_rendered += 1;
        }
        Ok(out)
    }

    fn disassemble(&mut self, classes: &[Vec<u8>]) -> Result<String> {
        let mut out = String::new();
        for (i, bytes) in classes.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            disassemble_class(&ClassFile::parse(bytes)?, &mut out)?;
        }
        Ok(out)
    }
}

fn describe_constant(cf: &ClassFile, index: u16) -> Result<String> {
    let pool = &cf.constant_pool;
    Ok(match pool.get(index)? {
        Constant::Class { name_index } => format!("class {}", pool.utf8(*name_index)?),
        Constant::String { string_index } => format!("String {}", pool.utf8(*string_index)?),
        Constant::Integer(v) => format!("int {v}"),
        Constant::Float(v) => format!("float {v}"),
        Constant::Long(v) => format!("long {v}"),
        Constant::Double(v) => format!("double {v}"),
        Constant::FieldRef { .. } => {
            let m = pool.member_ref(index)?;
            format!("Field {}.{}:{}", m.owner, m.name, m.descriptor)
        }
        Constant::MethodRef { .. } => {
            let m = pool.member_ref(index)?;
            format!("Method {}.{}:{}", m.owner, m.name, m.descriptor)
        }
        Constant::InterfaceMethodRef { .. } => {
            let m = pool.member_ref(index)?;
            format!("InterfaceMethod {}.{}:{}", m.owner, m.name, m.descriptor)
        }
        Constant::InvokeDynamic { bootstrap_method_attr_index, name_and_type_index }
        | Constant::Dynamic { bootstrap_method_attr_index, name_and_type_index } => {
            let (name, desc) = pool.name_and_type(*name_and_type_index)?;
            format!("InvokeDynamic #{bootstrap_method_attr_index}:{name}:{desc}")
        }
        Constant::MethodType { descriptor_index } => format!("MethodType {}", pool.utf8(*descriptor_index)?),
        Constant::MethodHandle { reference_kind, reference_index } => {
            format!("MethodHandle {reference_kind}:#{reference_index}")
        }
        other => format!("{other:?}"),
    })
}

fn disassemble_class(cf: &ClassFile, out: &mut String) -> Result<()> {
    let name = cf.name()?;
    let _ = write!(out, "{}{name}", class_modifiers(cf.access_flags));
    if let Some(s) = cf.super_name()? {
        let _ = write!(out, " extends {s}");
    }
    let interfaces = cf.interface_names()?;
    if !interfaces.is_empty() {
        let _ = write!(out, " implements {}", interfaces.join(", "));
    }
    let _ = writeln!(out, "\n  minor version: {}\n  major version: {}", cf.minor_version, cf.major_version);

    for field in &cf.fields {
        let _ = writeln!(
            out,
            "\n  {}{} {};",
            member_modifiers(field.access_flags, false, false),
            classfile::java_type(cf.member_descriptor(field)?),
            cf.member_name(field)?
        );
        let _ = writeln!(out, "    descriptor: {}", cf.member_descriptor(field)?);
    }

    for method in &cf.methods {
        let mname = cf.member_name(method)?;
        let desc = cf.member_descriptor(method)?;
        let _ = writeln!(out, "\n  {}{mname}{desc};", member_modifiers(method.access_flags, true, false));
        let Some(code) = cf.code(method)? else { continue };
        let _ = writeln!(out, "    Code:\n      stack={}, locals={}", code.max_stack, code.max_locals);
        for insn in classfile::instructions(&code.code) {
            let insn = insn?;
            let mnemonic = classfile::mnemonic(insn.opcode);
            let _ = write!(out, "      {:>4}: {mnemonic}", insn.offset);
            if let Some(index) = insn.cp_index() {
                let _ = write!(out, " #{index} // {}", describe_constant(cf, index)?);
            } else {
                match insn.opcode {
                    0x99..=0xa8 | 0xc6 | 0xc7 => {
                        let delta = i16::from_be_bytes([insn.operands[0], insn.operands[1]]);
                        let _ = write!(out, " {}", insn.offset as i64 + delta as i64);
                    }
                    0xc8 | 0xc9 => {
                        let o = insn.operands;
                        let delta = i32::from_be_bytes([o[0], o[1], o[2], o[3]]);
                        let _ = write!(out, " {}", insn.offset as i64 + delta as i64);
                    }
                    0x10 => {
                        let _ = write!(out, " {}", insn.operands[0] as i8);
                    }
                    0x11 => {
                        let _ = write!(out, " {}", i16::from_be_bytes([insn.operands[0], insn.operands[1]]));
                    }
                    0xaa | 0xab => {
                        let _ = write!(out, " {{ {} bytes }}", insn.operands.len());
                    }
                    _ => {
                        for b in insn.operands {
                            let _ = write!(out, " {b}");
                        }
                    }
                }
            }
            out.push('\n');
        }
    }
    Ok(())
}
