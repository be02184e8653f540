//! Class file reader.
//!
//! Parses the structural part of a `.class` file (constant pool, header,
//! fields, methods, attributes) and walks `Code` attribute bytecode. Only what
//! the indexer and the built-in engine need is decoded; everything else is kept
//! as raw attribute bytes.
//!
//! Malformed input always surfaces as [`JarlensError::ClassFormat`].

use crate::error::{JarlensError, Result};

pub const MAGIC: u32 = 0xCAFE_BABE;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_PROTECTED: u16 = 0x0004;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_FINAL: u16 = 0x0010;
pub const ACC_SYNCHRONIZED: u16 = 0x0020;
pub const ACC_VOLATILE: u16 = 0x0040;
pub const ACC_TRANSIENT: u16 = 0x0080;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;
pub const ACC_SYNTHETIC: u16 = 0x1000;
pub const ACC_ANNOTATION: u16 = 0x2000;
pub const ACC_ENUM: u16 = 0x4000;

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&e| e <= self.data.len()).ok_or_else(|| {
            JarlensError::ClassFormat(format!("unexpected end of data at offset {} (wanted {len} bytes)", self.pos))
        })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u1(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u2(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u4(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u8(&mut self) -> Result<u64> {
        let b = self.bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_be_bytes(buf))
    }
}

/// One constant pool slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Slot 0 and the second slot of long/double constants.
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name_index: u16 },
    String { string_index: u16 },
    FieldRef { class_index: u16, name_and_type_index: u16 },
    MethodRef { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodRef { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Field,
    Method,
}

/// A resolved `Fieldref` / `Methodref` / `InterfaceMethodref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub kind: MemberKind,
    pub owner: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.entries.iter().enumerate().map(|(i, c)| (i as u16, c))
    }

    pub fn get(&self, index: u16) -> Result<&Constant> {
        match self.entries.get(index as usize) {
            Some(Constant::Unusable) | None => {
                Err(JarlensError::ClassFormat(format!("invalid constant pool index {index}")))
            }
            Some(c) => Ok(c),
        }
    }

    pub fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Utf8(s) => Ok(s),
            other => Err(JarlensError::ClassFormat(format!("constant {index} is not Utf8: {other:?}"))),
        }
    }

    /// Internal name behind a `Class` constant.
    pub fn class_name(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            other => Err(JarlensError::ClassFormat(format!("constant {index} is not a Class: {other:?}"))),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str)> {
        match self.get(index)? {
            Constant::NameAndType { name_index, descriptor_index } => {
                Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?))
            }
            other => Err(JarlensError::ClassFormat(format!("constant {index} is not NameAndType: {other:?}"))),
        }
    }

    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>> {
        let (kind, class_index, nat) = match self.get(index)? {
            Constant::FieldRef { class_index, name_and_type_index } => {
                (MemberKind::Field, *class_index, *name_and_type_index)
            }
            Constant::MethodRef { class_index, name_and_type_index }
            | Constant::InterfaceMethodRef { class_index, name_and_type_index } => {
                (MemberKind::Method, *class_index, *name_and_type_index)
            }
            other => {
                return Err(JarlensError::ClassFormat(format!("constant {index} is not a member ref: {other:?}")))
            }
        };
        let (name, descriptor) = self.name_and_type(nat)?;
        Ok(MemberRef { kind, owner: self.class_name(class_index)?, name, descriptor })
    }
}

#[derive(Debug, Clone)]
pub struct AttributeInfo {
    pub name_index: u16,
    pub info: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

/// Decoded `Code` attribute.
#[derive(Debug, Clone)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<AttributeInfo>,
}

impl ClassFile {
    pub fn parse(bytes: &[u8]) -> Result<ClassFile> {
        let mut r = ByteReader::new(bytes);

        let magic = r.u4()?;
        if magic != MAGIC {
            return Err(JarlensError::ClassFormat(format!("bad magic number {magic:#010x}")));
        }
        let minor_version = r.u2()?;
        let major_version = r.u2()?;

        let constant_pool = read_constant_pool(&mut r)?;

        let access_flags = r.u2()?;
        let this_class = r.u2()?;
        let super_class = r.u2()?;

        let interfaces_count = r.u2()?;
        let mut interfaces = Vec::with_capacity(interfaces_count as usize);
        for _ in 0..interfaces_count {
            interfaces.push(r.u2()?);
        }

        let fields = read_members(&mut r)?;
        let methods = read_members(&mut r)?;
        let attributes = read_attributes(&mut r)?;

        Ok(ClassFile {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    pub fn name(&self) -> Result<&str> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Superclass internal name; `None` only for `java/lang/Object` and module-info.
    pub fn super_name(&self) -> Result<Option<&str>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool.class_name(self.super_class).map(Some)
    }

    pub fn interface_names(&self) -> Result<Vec<&str>> {
        self.interfaces.iter().map(|&i| self.constant_pool.class_name(i)).collect()
    }

    pub fn member_name(&self, member: &MemberInfo) -> Result<&str> {
        self.constant_pool.utf8(member.name_index)
    }

    pub fn member_descriptor(&self, member: &MemberInfo) -> Result<&str> {
        self.constant_pool.utf8(member.descriptor_index)
    }

    /// Member and class operands of every instruction in `code`, in order.
    /// Array class operands resolve to their element classes.
    pub fn code_references(&self, code: &[u8]) -> Result<Vec<CodeRef<'_>>> {
        use opcodes::*;
        let pool = &self.constant_pool;
        let mut refs = Vec::new();
        for insn in instructions(code) {
            let insn = insn?;
            let Some(index) = insn.cp_index() else { continue };
            match insn.opcode {
                GETSTATIC..=INVOKEINTERFACE => refs.push(CodeRef::Member(pool.member_ref(index)?)),
                NEW | ANEWARRAY | CHECKCAST | INSTANCEOF | MULTIANEWARRAY => {
                    push_class_refs(&mut refs, pool.class_name(index)?);
                }
                LDC | LDC_W => {
                    if let Constant::Class { name_index } = pool.get(index)? {
                        push_class_refs(&mut refs, pool.utf8(*name_index)?);
                    }
                }
                _ => {}
            }
        }
        Ok(refs)
    }

    /// The decoded `Code` attribute of a method, if it has one.
    pub fn code(&self, method: &MemberInfo) -> Result<Option<CodeAttribute>> {
        for attr in &method.attributes {
            if self.constant_pool.utf8(attr.name_index)? != "Code" {
                continue;
            }
            let mut r = ByteReader::new(&attr.info);
            let max_stack = r.u2()?;
            let max_locals = r.u2()?;
            let code_length = r.u4()? as usize;
            let code = r.bytes(code_length)?.to_vec();
            return Ok(Some(CodeAttribute { max_stack, max_locals, code }));
        }
        Ok(None)
    }
}

/// A symbol referenced from bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeRef<'a> {
    Member(MemberRef<'a>),
    Class(&'a str),
}

fn push_class_refs<'a>(refs: &mut Vec<CodeRef<'a>>, name: &'a str) {
    if name.starts_with('[') {
        refs.extend(descriptor_classes(name).into_iter().map(CodeRef::Class));
    } else {
        refs.push(CodeRef::Class(name));
    }
}

fn read_constant_pool(r: &mut ByteReader<'_>) -> Result<ConstantPool> {
    let count = r.u2()? as usize;
    let mut entries = Vec::with_capacity(count.max(1));
    entries.push(Constant::Unusable);

    while entries.len() < count {
        let tag = r.u1()?;
        let constant = match tag {
            1 => {
                let len = r.u2()? as usize;
                // Modified UTF-8; lossy decoding only affects surrogate pairs and NUL.
                Constant::Utf8(String::from_utf8_lossy(r.bytes(len)?).into_owned())
            }
            3 => Constant::Integer(r.u4()? as i32),
            4 => Constant::Float(f32::from_bits(r.u4()?)),
            5 => Constant::Long(r.u8()? as i64),
            6 => Constant::Double(f64::from_bits(r.u8()?)),
            7 => Constant::Class { name_index: r.u2()? },
            8 => Constant::String { string_index: r.u2()? },
            9 => Constant::FieldRef { class_index: r.u2()?, name_and_type_index: r.u2()? },
            10 => Constant::MethodRef { class_index: r.u2()?, name_and_type_index: r.u2()? },
            11 => Constant::InterfaceMethodRef { class_index: r.u2()?, name_and_type_index: r.u2()? },
            12 => Constant::NameAndType { name_index: r.u2()?, descriptor_index: r.u2()? },
            15 => Constant::MethodHandle { reference_kind: r.u1()?, reference_index: r.u2()? },
            16 => Constant::MethodType { descriptor_index: r.u2()? },
            17 => Constant::Dynamic { bootstrap_method_attr_index: r.u2()?, name_and_type_index: r.u2()? },
            18 => Constant::InvokeDynamic { bootstrap_method_attr_index: r.u2()?, name_and_type_index: r.u2()? },
            19 => Constant::Module { name_index: r.u2()? },
            20 => Constant::Package { name_index: r.u2()? },
            other => {
                return Err(JarlensError::ClassFormat(format!(
                    "unknown constant pool tag {other} at index {}",
                    entries.len()
                )))
            }
        };
        let wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
        entries.push(constant);
        if wide {
            entries.push(Constant::Unusable);
        }
    }

    Ok(ConstantPool { entries })
}

fn read_attributes(r: &mut ByteReader<'_>) -> Result<Vec<AttributeInfo>> {
    let count = r.u2()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = r.u2()?;
        let len = r.u4()? as usize;
        attributes.push(AttributeInfo { name_index, info: r.bytes(len)?.to_vec() });
    }
    Ok(attributes)
}

fn read_members(r: &mut ByteReader<'_>) -> Result<Vec<MemberInfo>> {
    let count = r.u2()?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        members.push(MemberInfo {
            access_flags: r.u2()?,
            name_index: r.u2()?,
            descriptor_index: r.u2()?,
            attributes: read_attributes(r)?,
        });
    }
    Ok(members)
}

// --- bytecode ---------------------------------------------------------------

pub mod opcodes {
    pub const LDC: u8 = 0x12;
    pub const LDC_W: u8 = 0x13;
    pub const LDC2_W: u8 = 0x14;
    pub const IINC: u8 = 0x84;
    pub const TABLESWITCH: u8 = 0xaa;
    pub const LOOKUPSWITCH: u8 = 0xab;
    pub const GETSTATIC: u8 = 0xb2;
    pub const PUTSTATIC: u8 = 0xb3;
    pub const GETFIELD: u8 = 0xb4;
    pub const PUTFIELD: u8 = 0xb5;
    pub const INVOKEVIRTUAL: u8 = 0xb6;
    pub const INVOKESPECIAL: u8 = 0xb7;
    pub const INVOKESTATIC: u8 = 0xb8;
    pub const INVOKEINTERFACE: u8 = 0xb9;
    pub const INVOKEDYNAMIC: u8 = 0xba;
    pub const NEW: u8 = 0xbb;
    pub const ANEWARRAY: u8 = 0xbd;
    pub const CHECKCAST: u8 = 0xc0;
    pub const INSTANCEOF: u8 = 0xc1;
    pub const WIDE: u8 = 0xc4;
    pub const MULTIANEWARRAY: u8 = 0xc5;
}

const MNEMONICS: [&str; 0xca] = [
    "nop", "aconst_null", "iconst_m1", "iconst_0", "iconst_1", "iconst_2", "iconst_3", "iconst_4",
    "iconst_5", "lconst_0", "lconst_1", "fconst_0", "fconst_1", "fconst_2", "dconst_0", "dconst_1",
    "bipush", "sipush", "ldc", "ldc_w", "ldc2_w", "iload", "lload", "fload",
    "dload", "aload", "iload_0", "iload_1", "iload_2", "iload_3", "lload_0", "lload_1",
    "lload_2", "lload_3", "fload_0", "fload_1", "fload_2", "fload_3", "dload_0", "dload_1",
    "dload_2", "dload_3", "aload_0", "aload_1", "aload_2", "aload_3", "iaload", "laload",
    "faload", "daload", "aaload", "baload", "caload", "saload", "istore", "lstore",
    "fstore", "dstore", "astore", "istore_0", "istore_1", "istore_2", "istore_3", "lstore_0",
    "lstore_1", "lstore_2", "lstore_3", "fstore_0", "fstore_1", "fstore_2", "fstore_3", "dstore_0",
    "dstore_1", "dstore_2", "dstore_3", "astore_0", "astore_1", "astore_2", "astore_3", "iastore",
    "lastore", "fastore", "dastore", "aastore", "bastore", "castore", "sastore", "pop",
    "pop2", "dup", "dup_x1", "dup_x2", "dup2", "dup2_x1", "dup2_x2", "swap",
    "iadd", "ladd", "fadd", "dadd", "isub", "lsub", "fsub", "dsub",
    "imul", "lmul", "fmul", "dmul", "idiv", "ldiv", "fdiv", "ddiv",
    "irem", "lrem", "frem", "drem", "ineg", "lneg", "fneg", "dneg",
    "ishl", "lshl", "ishr", "lshr", "iushr", "lushr", "iand", "land",
    "ior", "lor", "ixor", "lxor", "iinc", "i2l", "i2f", "i2d",
    "l2i", "l2f", "l2d", "f2i", "f2l", "f2d", "d2i", "d2l",
    "d2f", "i2b", "i2c", "i2s", "lcmp", "fcmpl", "fcmpg", "dcmpl",
    "dcmpg", "ifeq", "ifne", "iflt", "ifge", "ifgt", "ifle", "if_icmpeq",
    "if_icmpne", "if_icmplt", "if_icmpge", "if_icmpgt", "if_icmple", "if_acmpeq", "if_acmpne", "goto",
    "jsr", "ret", "tableswitch", "lookupswitch", "ireturn", "lreturn", "freturn", "dreturn",
    "areturn", "return", "getstatic", "putstatic", "getfield", "putfield", "invokevirtual", "invokespecial",
    "invokestatic", "invokeinterface", "invokedynamic", "new", "newarray", "anewarray", "arraylength", "athrow",
    "checkcast", "instanceof", "monitorenter", "monitorexit", "wide", "multianewarray", "ifnull", "ifnonnull",
    "goto_w", "jsr_w",
];

pub fn mnemonic(opcode: u8) -> &'static str {
    match opcode {
        0xca => "breakpoint",
        0xfe => "impdep1",
        0xff => "impdep2",
        op => MNEMONICS.get(op as usize).copied().unwrap_or("<unknown>"),
    }
}

/// One decoded instruction; `operands` excludes the opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction<'a> {
    pub offset: usize,
    pub opcode: u8,
    pub operands: &'a [u8],
}

impl Instruction<'_> {
    /// The constant pool index operand of instructions that carry one.
    pub fn cp_index(&self) -> Option<u16> {
        use opcodes::*;
        match self.opcode {
            LDC => self.operands.first().map(|&b| b as u16),
            LDC_W | LDC2_W | GETSTATIC..=INVOKEDYNAMIC | NEW | ANEWARRAY | CHECKCAST | INSTANCEOF
            | MULTIANEWARRAY => {
                let b = self.operands.get(..2)?;
                Some(u16::from_be_bytes([b[0], b[1]]))
            }
            _ => None,
        }
    }
}

fn be_i32(code: &[u8], at: usize) -> Result<i32> {
    code.get(at..at + 4)
        .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| JarlensError::ClassFormat(format!("truncated switch at code offset {at}")))
}

fn instruction_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let len = match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        0x12 => 2,
        0x13 | 0x14 => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        0x84 => 3,
        0x85..=0x98 => 1,
        0x99..=0xa8 => 3,
        0xa9 => 2,
        0xaa => {
            let pad = (4 - (offset + 1) % 4) % 4;
            let base = offset + 1 + pad;
            let low = be_i32(code, base + 4)?;
            let high = be_i32(code, base + 8)?;
            if high < low {
                return Err(JarlensError::ClassFormat(format!("tableswitch high < low at {offset}")));
            }
            let n = (high as i64 - low as i64 + 1) as usize;
            1 + pad + 12 + n * 4
        }
        0xab => {
            let pad = (4 - (offset + 1) % 4) % 4;
            let base = offset + 1 + pad;
            let npairs = be_i32(code, base + 4)?;
            if npairs < 0 {
                return Err(JarlensError::ClassFormat(format!("negative lookupswitch size at {offset}")));
            }
            1 + pad + 8 + npairs as usize * 8
        }
        0xac..=0xb1 => 1,
        0xb2..=0xb8 => 3,
        0xb9 | 0xba => 5,
        0xbb => 3,
        0xbc => 2,
        0xbd => 3,
        0xbe | 0xbf => 1,
        0xc0 | 0xc1 => 3,
        0xc2 | 0xc3 => 1,
        0xc4 => match code.get(offset + 1) {
            Some(&opcodes::IINC) => 6,
            Some(_) => 4,
            None => return Err(JarlensError::ClassFormat(format!("truncated wide at {offset}"))),
        },
        0xc5 => 4,
        0xc6 | 0xc7 => 3,
        0xc8 | 0xc9 => 5,
        0xca | 0xfe | 0xff => 1,
        other => return Err(JarlensError::ClassFormat(format!("unknown opcode {other:#04x} at {offset}"))),
    };
    Ok(len)
}

/// Iterator over the instructions of a method body.
pub struct Instructions<'a> {
    code: &'a [u8],
    offset: usize,
    failed: bool,
}

pub fn instructions(code: &[u8]) -> Instructions<'_> {
    Instructions { code, offset: 0, failed: false }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.code.len() {
            return None;
        }
        let offset = self.offset;
        let len = match instruction_length(self.code, offset) {
            Ok(len) if offset + len <= self.code.len() => len,
            Ok(_) => {
                self.failed = true;
                return Some(Err(JarlensError::ClassFormat(format!("instruction at {offset} overruns code"))));
            }
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        };
        self.offset += len;
        Some(Ok(Instruction { offset, opcode: self.code[offset], operands: &self.code[offset + 1..offset + len] }))
    }
}

// --- descriptors ------------------------------------------------------------

/// Every class named by a field or method descriptor (array element types included).
pub fn descriptor_classes(descriptor: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = descriptor;
    while let Some(start) = rest.find('L') {
        let after = &rest[start + 1..];
        match after.find(';') {
            Some(end) => {
                out.push(&after[..end]);
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    out
}

/// Java source spelling of one field type, returning the rest of the descriptor.
fn parse_field_type(desc: &str) -> Option<(String, &str)> {
    let mut chars = desc.chars();
    let ty = match chars.next()? {
        'B' => "byte".to_string(),
        'C' => "char".to_string(),
        'D' => "double".to_string(),
        'F' => "float".to_string(),
        'I' => "int".to_string(),
        'J' => "long".to_string(),
        'S' => "short".to_string(),
        'Z' => "boolean".to_string(),
        'V' => "void".to_string(),
        'L' => {
            let end = desc.find(';')?;
            let name = desc[1..end].replace(['/', '$'], ".");
            return Some((name, &desc[end + 1..]));
        }
        '[' => {
            let (inner, rest) = parse_field_type(&desc[1..])?;
            return Some((format!("{inner}[]"), rest));
        }
        _ => return None,
    };
    Some((ty, chars.as_str()))
}

pub fn java_type(descriptor: &str) -> String {
    parse_field_type(descriptor).map(|(t, _)| t).unwrap_or_else(|| descriptor.to_string())
}

/// Parameter and return types of a method descriptor in Java spelling.
pub fn method_types(descriptor: &str) -> Option<(Vec<String>, String)> {
    let mut rest = descriptor.strip_prefix('(')?;
    let mut params = Vec::new();
    while !rest.starts_with(')') {
        let (ty, r) = parse_field_type(rest)?;
        params.push(ty);
        rest = r;
    }
    let (ret, _) = parse_field_type(&rest[1..])?;
    Some((params, ret))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Minimal class file writer for tests.

    #[derive(Default)]
    pub struct ClassBuilder {
        pool: Vec<Vec<u8>>,
        pub access: u16,
        this: u16,
        sup: u16,
        interfaces: Vec<u16>,
        fields: Vec<Vec<u8>>,
        methods: Vec<Vec<u8>>,
    }

    impl ClassBuilder {
        pub fn new(name: &str, super_name: Option<&str>) -> Self {
            let mut b = ClassBuilder { access: super::ACC_PUBLIC | 0x20, ..Default::default() };
            b.this = b.class(name);
            b.sup = super_name.map(|s| b.class(s)).unwrap_or(0);
            b
        }

        fn push(&mut self, entry: Vec<u8>) -> u16 {
            self.pool.push(entry);
            self.pool.len() as u16
        }

        pub fn utf8(&mut self, s: &str) -> u16 {
            let mut e = vec![1u8];
            e.extend_from_slice(&(s.len() as u16).to_be_bytes());
            e.extend_from_slice(s.as_bytes());
            self.push(e)
        }

        pub fn class(&mut self, name: &str) -> u16 {
            let n = self.utf8(name);
            let mut e = vec![7u8];
            e.extend_from_slice(&n.to_be_bytes());
            self.push(e)
        }

        pub fn member_ref(&mut self, tag: u8, owner: &str, name: &str, desc: &str) -> u16 {
            let c = self.class(owner);
            let n = self.utf8(name);
            let d = self.utf8(desc);
            let mut nat = vec![12u8];
            nat.extend_from_slice(&n.to_be_bytes());
            nat.extend_from_slice(&d.to_be_bytes());
            let nat = self.push(nat);
            let mut e = vec![tag];
            e.extend_from_slice(&c.to_be_bytes());
            e.extend_from_slice(&nat.to_be_bytes());
            self.push(e)
        }

        pub fn long(&mut self, v: i64) -> u16 {
            let mut e = vec![5u8];
            e.extend_from_slice(&v.to_be_bytes());
            let idx = self.push(e);
            // second slot
            self.pool.push(Vec::new());
            idx
        }

        pub fn interface(&mut self, name: &str) -> &mut Self {
            let c = self.class(name);
            self.interfaces.push(c);
            self
        }

        pub fn field(&mut self, access: u16, name: &str, desc: &str) -> &mut Self {
            let n = self.utf8(name);
            let d = self.utf8(desc);
            let mut f = Vec::new();
            f.extend_from_slice(&access.to_be_bytes());
            f.extend_from_slice(&n.to_be_bytes());
            f.extend_from_slice(&d.to_be_bytes());
            f.extend_from_slice(&0u16.to_be_bytes());
            self.fields.push(f);
            self
        }

        pub fn method(&mut self, access: u16, name: &str, desc: &str, code: Option<Vec<u8>>) -> &mut Self {
            let n = self.utf8(name);
            let d = self.utf8(desc);
            let mut m = Vec::new();
            m.extend_from_slice(&access.to_be_bytes());
            m.extend_from_slice(&n.to_be_bytes());
            m.extend_from_slice(&d.to_be_bytes());
            match code {
                Some(code) => {
                    let code_name = self.utf8("Code");
                    m.extend_from_slice(&1u16.to_be_bytes());
                    m.extend_from_slice(&code_name.to_be_bytes());
                    let mut info = Vec::new();
                    info.extend_from_slice(&4u16.to_be_bytes());
                    info.extend_from_slice(&4u16.to_be_bytes());
                    info.extend_from_slice(&(code.len() as u32).to_be_bytes());
                    info.extend_from_slice(&code);
                    info.extend_from_slice(&0u16.to_be_bytes());
                    info.extend_from_slice(&0u16.to_be_bytes());
                    m.extend_from_slice(&(info.len() as u32).to_be_bytes());
                    m.extend_from_slice(&info);
                }
                None => m.extend_from_slice(&0u16.to_be_bytes()),
            }
            self.methods.push(m);
            self
        }

        pub fn build(&self) -> Vec<u8> {
            let mut out = Vec::new();
            out.extend_from_slice(&super::MAGIC.to_be_bytes());
            out.extend_from_slice(&0u16.to_be_bytes());
            out.extend_from_slice(&52u16.to_be_bytes());
            out.extend_from_slice(&((self.pool.len() + 1) as u16).to_be_bytes());
            for e in &self.pool {
                out.extend_from_slice(e);
            }
            out.extend_from_slice(&self.access.to_be_bytes());
            out.extend_from_slice(&self.this.to_be_bytes());
            out.extend_from_slice(&self.sup.to_be_bytes());
            out.extend_from_slice(&(self.interfaces.len() as u16).to_be_bytes());
            for i in &self.interfaces {
                out.extend_from_slice(&i.to_be_bytes());
            }
            out.extend_from_slice(&(self.fields.len() as u16).to_be_bytes());
            for f in &self.fields {
                out.extend_from_slice(f);
            }
            out.extend_from_slice(&(self.methods.len() as u16).to_be_bytes());
            for m in &self.methods {
                out.extend_from_slice(m);
            }
            out.extend_from_slice(&0u16.to_be_bytes());
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ClassBuilder;
    use super::*;

    #[test]
    fn parses_header_members_and_wide_constants() {
        let mut b = ClassBuilder::new("a/Foo", Some("java/lang/Object"));
        b.long(42);
        b.interface("java/lang/Runnable");
        b.field(ACC_PRIVATE, "count", "I");
        b.method(ACC_PUBLIC, "run", "()V", Some(vec![0xb1]));
        let cf = ClassFile::parse(&b.build()).unwrap();

        assert_eq!(cf.name().unwrap(), "a/Foo");
        assert_eq!(cf.super_name().unwrap(), Some("java/lang/Object"));
        assert_eq!(cf.interface_names().unwrap(), vec!["java/lang/Runnable"]);
        assert_eq!(cf.member_name(&cf.fields[0]).unwrap(), "count");
        let code = cf.code(&cf.methods[0]).unwrap().unwrap();
        assert_eq!(code.code, vec![0xb1]);
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        assert!(matches!(ClassFile::parse(&[0, 1, 2, 3]), Err(JarlensError::ClassFormat(_))));
        let bytes = ClassBuilder::new("a/Foo", None).build();
        assert!(ClassFile::parse(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn walks_switch_and_wide_instructions() {
        // iconst_0, tableswitch (pad 2) default=0 low=0 high=1 two offsets, wide iinc, return
        let mut code = vec![0x03, 0xaa, 0, 0];
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&1i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&[0xc4, 0x84, 0, 1, 0, 1]);
        code.push(0xb1);

        let ops: Vec<_> = instructions(&code).map(|i| i.unwrap()).collect();
        let names: Vec<_> = ops.iter().map(|i| mnemonic(i.opcode)).collect();
        assert_eq!(names, vec!["iconst_0", "tableswitch", "wide", "return"]);
        assert_eq!(ops[2].offset, 24);
    }

    #[test]
    fn collects_code_references() {
        let mut b = ClassBuilder::new("a/Foo", Some("java/lang/Object"));
        let out = b.member_ref(9, "java/lang/System", "out", "Ljava/io/PrintStream;");
        let println = b.member_ref(10, "java/io/PrintStream", "println", "(Ljava/lang/String;)V");
        let arr = b.class("[La/Bar;");
        let mut code = vec![0xb2];
        code.extend_from_slice(&out.to_be_bytes());
        code.push(0xb6);
        code.extend_from_slice(&println.to_be_bytes());
        code.push(0xc0);
        code.extend_from_slice(&arr.to_be_bytes());
        code.push(0xb1);
        b.method(ACC_PUBLIC, "go", "()V", Some(code));

        let cf = ClassFile::parse(&b.build()).unwrap();
        let code = cf.code(&cf.methods[0]).unwrap().unwrap();
        let refs = cf.code_references(&code.code).unwrap();
        assert_eq!(refs.len(), 3);
        assert!(matches!(&refs[0], CodeRef::Member(m) if m.kind == MemberKind::Field && m.name == "out"));
        assert!(matches!(&refs[1], CodeRef::Member(m) if m.owner == "java/io/PrintStream"));
        assert_eq!(refs[2], CodeRef::Class("a/Bar"));
    }

    #[test]
    fn descriptor_helpers() {
        assert_eq!(descriptor_classes("(Ljava/lang/String;[La/B;I)La/C;"), vec!["java/lang/String", "a/B", "a/C"]);
        assert_eq!(java_type("[[Ljava/util/Map$Entry;"), "java.util.Map.Entry[][]");
        let (params, ret) = method_types("(IJLjava/lang/String;)V").unwrap();
        assert_eq!(params, vec!["int", "long", "java.lang.String"]);
        assert_eq!(ret, "void");
    }
}
