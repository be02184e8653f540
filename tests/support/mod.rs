//! Shared fixtures: a scripted engine that records how it is called, and a
//! small class file writer for tests that need real bytecode.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use jarlens::archive::MemoryArchive;
use jarlens::engine::{DecompileRequest, Engine, EngineFactory, EngineVariant};
use jarlens::{JarlensError, Result, Token};

/// Counters of one engine instance (one per worker).
#[derive(Default)]
pub struct EngineStats {
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub calls: AtomicUsize,
}

#[derive(Default)]
pub struct Script {
    pub engines: Mutex<Vec<Arc<EngineStats>>>,
    /// Every unit handed to the engine, in call order.
    pub decompiled: Mutex<Vec<String>>,
    pub fail_on: Mutex<HashSet<String>>,
    pub delay: Mutex<Duration>,
    pub native_loads: AtomicUsize,
    /// While set, engine calls block until [`Script::release`].
    held: Mutex<bool>,
    released: Condvar,
}

impl Script {
    pub fn total_calls(&self) -> usize {
        self.engines.lock().unwrap().iter().map(|e| e.calls.load(Ordering::SeqCst)).sum()
    }

    pub fn max_concurrency_per_engine(&self) -> usize {
        self.engines.lock().unwrap().iter().map(|e| e.max_active.load(Ordering::SeqCst)).max().unwrap_or(0)
    }

    pub fn times_decompiled(&self, name: &str) -> usize {
        self.decompiled.lock().unwrap().iter().filter(|n| *n == name).count()
    }

    pub fn fail(&self, name: &str) {
        self.fail_on.lock().unwrap().insert(name.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Block engine calls until the returned guard is dropped (or
    /// [`Script::release`] is called).
    pub fn hold(&self) -> Held<'_> {
        *self.held.lock().unwrap() = true;
        Held(self)
    }

    pub fn release(&self) {
        *self.held.lock().unwrap() = false;
        self.released.notify_all();
    }

    fn wait_while_held(&self) {
        let mut held = self.held.lock().unwrap();
        while *held {
            held = self.released.wait(held).unwrap();
        }
    }
}

pub struct Held<'a>(&'a Script);

impl Drop for Held<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Engine factory whose native variant can be toggled.
pub struct ScriptedFactory {
    pub script: Arc<Script>,
    pub native_available: bool,
}

impl ScriptedFactory {
    pub fn new() -> (Arc<Self>, Arc<Script>) {
        let script = Arc::new(Script::default());
        (Arc::new(ScriptedFactory { script: Arc::clone(&script), native_available: false }), script)
    }
}

impl EngineFactory for ScriptedFactory {
    fn load(&self, variant: EngineVariant) -> Result<Box<dyn Engine>> {
        if variant == EngineVariant::Native {
            self.script.native_loads.fetch_add(1, Ordering::SeqCst);
            if !self.native_available {
                return Err(JarlensError::EngineLoad { variant, reason: "not built for this host".into() });
            }
        }
        let stats = Arc::new(EngineStats::default());
        self.script.engines.lock().unwrap().push(Arc::clone(&stats));
        Ok(Box::new(ScriptedEngine { variant, stats, script: Arc::clone(&self.script) }))
    }
}

struct ScriptedEngine {
    variant: EngineVariant,
    stats: Arc<EngineStats>,
    script: Arc<Script>,
}

impl Engine for ScriptedEngine {
    fn variant(&self) -> EngineVariant {
        self.variant
    }

    fn decompile_many(&mut self, names: &[String], request: DecompileRequest<'_>) -> Result<BTreeMap<String, String>> {
        let now = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active.fetch_max(now, Ordering::SeqCst);
        self.stats.calls.fetch_add(1, Ordering::SeqCst);
        let _active = Guard(&self.stats.active);

        self.script.wait_while_held();
        let delay = *self.script.delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        {
            let fail_on = self.script.fail_on.lock().unwrap();
            if let Some(bad) = names.iter().find(|n| fail_on.contains(*n)) {
                return Err(JarlensError::Engine(format!("scripted failure on {bad}")));
            }
        }

        let mut out = BTreeMap::new();
        for name in names.iter().filter(|n| !n.contains('$')) {
            request.logger.on_start_class(name);
            let bytes = (request.source)(name).unwrap_or_default();
            let inner = names.iter().filter(|n| n.starts_with(&format!("{name}$"))).count();
            let options: Vec<String> = request.options.iter().map(|(k, v)| format!("{k}={v}")).collect();
            let header = format!("// options: {}\n", options.join(","));
            let text = format!("{header}class {name} {{ /* {} */ /* inner: {inner} */ }}\n", String::from_utf8_lossy(&bytes));
            let start = header.len() + "class ".len();
            request.tokens.on_token(name, Token::class(start, name.len(), name.as_str(), true));
            self.script.decompiled.lock().unwrap().push(name.clone());
            out.insert(name.clone(), text);
        }
        Ok(out)
    }

    fn disassemble(&mut self, classes: &[Vec<u8>]) -> Result<String> {
        Ok(classes.iter().map(|c| format!("// {} bytes\n", c.len())).collect())
    }
}

struct Guard<'a>(&'a AtomicUsize);

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Spin until `done` holds; panics after five seconds.
pub fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(std::time::Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

/// `count` top-level classes `p/C000`… with text payloads.
pub fn text_archive(label: &str, count: usize) -> MemoryArchive {
    let mut archive = MemoryArchive::new(label);
    for i in 0..count {
        archive.insert(&format!("p/C{i:03}"), format!("payload {i}").into_bytes());
    }
    archive
}

// --- class file writer ------------------------------------------------------

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_FINAL: u16 = 0x0010;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;

pub const GETFIELD: u8 = 0xb4;
pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESPECIAL: u8 = 0xb7;
pub const NEW: u8 = 0xbb;
pub const RETURN: u8 = 0xb1;

/// Writes version 52 class files with a growing constant pool.
pub struct ClassWriter {
    pool: Vec<Vec<u8>>,
    access: u16,
    this: u16,
    sup: u16,
    interfaces: Vec<u16>,
    fields: Vec<Vec<u8>>,
    methods: Vec<Vec<u8>>,
}

impl ClassWriter {
    pub fn new(name: &str, super_name: &str) -> Self {
        let mut w = ClassWriter {
            pool: Vec::new(),
            access: ACC_PUBLIC | 0x20,
            this: 0,
            sup: 0,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        };
        w.this = w.class(name);
        w.sup = w.class(super_name);
        w
    }

    pub fn access(mut self, access: u16) -> Self {
        self.access = access;
        self
    }

    fn push(&mut self, entry: Vec<u8>) -> u16 {
        self.pool.push(entry);
        self.pool.len() as u16
    }

    fn utf8(&mut self, s: &str) -> u16 {
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

    fn member_ref(&mut self, tag: u8, owner: &str, name: &str, desc: &str) -> u16 {
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

    pub fn method_ref(&mut self, owner: &str, name: &str, desc: &str) -> u16 {
        self.member_ref(10, owner, name, desc)
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, desc: &str) -> u16 {
        self.member_ref(9, owner, name, desc)
    }

    pub fn interface(mut self, name: &str) -> Self {
        let c = self.class(name);
        self.interfaces.push(c);
        self
    }

    pub fn field(mut self, access: u16, name: &str, desc: &str) -> Self {
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

    /// Method whose body is `code` (no body when `None`).
    pub fn method(mut self, access: u16, name: &str, desc: &str, code: Option<Vec<u8>>) -> Self {
        let n = self.utf8(name);
        let d = self.utf8(desc);
        let mut m = Vec::new();
        m.extend_from_slice(&access.to_be_bytes());
        m.extend_from_slice(&n.to_be_bytes());
        m.extend_from_slice(&d.to_be_bytes());
        match code {
            Some(code) => {
                let code_name = self.utf8("Code");
                let mut info = Vec::new();
                info.extend_from_slice(&4u16.to_be_bytes());
                info.extend_from_slice(&4u16.to_be_bytes());
                info.extend_from_slice(&(code.len() as u32).to_be_bytes());
                info.extend_from_slice(&code);
                info.extend_from_slice(&0u16.to_be_bytes());
                info.extend_from_slice(&0u16.to_be_bytes());
                m.extend_from_slice(&1u16.to_be_bytes());
                m.extend_from_slice(&code_name.to_be_bytes());
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
        out.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
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

/// `op index_hi index_lo` for a constant pool operand.
pub fn op(opcode: u8, index: u16) -> Vec<u8> {
    let [hi, lo] = index.to_be_bytes();
    vec![opcode, hi, lo]
}

/// A small program: a service interface, an abstract base, an implementation
/// calling into a helper, and a caller that constructs the implementation.
pub fn sample_program() -> Vec<(String, Vec<u8>)> {
    let service = ClassWriter::new("app/Service", "java/lang/Object")
        .access(ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT)
        .method(ACC_PUBLIC | ACC_ABSTRACT, "serve", "(I)V", None);

    let base = ClassWriter::new("app/Base", "java/lang/Object")
        .access(ACC_PUBLIC | ACC_ABSTRACT | 0x20)
        .interface("app/Service")
        .field(ACC_PRIVATE, "count", "I");

    let helper = ClassWriter::new("app/Helper", "java/lang/Object").method(ACC_PUBLIC | ACC_STATIC, "assist", "(I)V", Some(vec![RETURN]));

    let mut worker = ClassWriter::new("app/Worker", "app/Base").access(ACC_PUBLIC | ACC_FINAL | 0x20);
    let assist = worker.method_ref("app/Helper", "assist", "(I)V");
    let count = worker.field_ref("app/Base", "count", "I");
    let mut serve = op(GETFIELD, count);
    serve.extend(op(0xb8, assist));
    serve.push(RETURN);
    let worker = worker.method(ACC_PUBLIC, "serve", "(I)V", Some(serve));

    let mut caller = ClassWriter::new("app/Caller", "java/lang/Object");
    let worker_class = caller.class("app/Worker");
    let init = caller.method_ref("app/Worker", "<init>", "()V");
    let serve_ref = caller.method_ref("app/Worker", "serve", "(I)V");
    let mut run = op(NEW, worker_class);
    run.extend(op(INVOKESPECIAL, init));
    run.extend(op(INVOKEVIRTUAL, serve_ref));
    run.push(RETURN);
    let caller = caller.method(ACC_PUBLIC, "run", "()V", Some(run));

    let inner = ClassWriter::new("app/Caller$1", "java/lang/Object");

    vec![
        ("app/Service".to_string(), service.build()),
        ("app/Base".to_string(), base.build()),
        ("app/Helper".to_string(), helper.build()),
        ("app/Worker".to_string(), worker.build()),
        ("app/Caller".to_string(), caller.build()),
        ("app/Caller$1".to_string(), inner.build()),
    ]
}

pub fn sample_archive(label: &str) -> MemoryArchive {
    let mut archive = MemoryArchive::new(label);
    for (name, bytes) in sample_program() {
        archive.insert(&name, bytes);
    }
    archive
}
