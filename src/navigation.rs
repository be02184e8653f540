//! Jump-to-reference over a decompiled unit's tokens.
//!
//! A lookup result pairs the symbol that was searched for (the query key)
//! with one site that uses it. Opening the site's class and jumping to the
//! usage is a two-phase scan: first the declaration of the site itself, then
//! the first token after it that names the query.

use crate::common::{outer_class, DecompileResult, Token, TokenKind};
use crate::indexer::{QueryType, ReferenceKey, ReferenceSite};

/// A pending jump from a reference list entry into decompiled source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationRequest {
    class_name: String,
    query: String,
    reference: String,
}

impl NavigationRequest {
    /// `query` is a reference key, `reference` a site string as returned by
    /// the indexer.
    pub fn new(query: impl Into<String>, reference: impl Into<String>) -> Self {
        let query = query.into();
        let reference = reference.into();
        let owner = reference.get(2..).unwrap_or("").split(':').next().unwrap_or("");
        let class_name = outer_class(owner).to_string();
        NavigationRequest { class_name, query, reference }
    }

    /// Top-level class to open.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Class-level sites (`c:`) only open the class.
    pub fn has_jump_target(&self) -> bool {
        !self.reference.starts_with("c:")
    }
}

fn matches_site(token: &Token, owner: &str, name: &str, descriptor: &str) -> bool {
    token.class_name == owner && token.name.as_deref() == Some(name) && token.descriptor.as_deref() == Some(descriptor)
}

/// The token to jump to for `request` in `result`, whose tokens are sorted
/// by start offset.
///
/// Field sites resolve to the field declaration. Method sites resolve to the
/// first token after the method declaration that names the query (a class
/// token for a constructor), or to the declaration itself when none does.
pub fn get_next_jump_token<'a>(result: &'a DecompileResult, request: &NavigationRequest) -> Option<&'a Token> {
    if result.class_name != request.class_name {
        tracing::debug!(
            expected = %request.class_name,
            actual = %result.class_name,
            "decompiled class does not match the navigation target"
        );
        return None;
    }
    if !request.has_jump_target() {
        return None;
    }

    let site: ReferenceSite = match request.reference.parse() {
        Ok(site) => site,
        Err(e) => {
            tracing::debug!("{e}");
            return None;
        }
    };
    let (expected, owner, name, descriptor) = match &site {
        ReferenceSite::Method { owner, name, descriptor } => (TokenKind::Method, owner, name, descriptor),
        ReferenceSite::Field { owner, name, descriptor } => (TokenKind::Field, owner, name, descriptor),
        ReferenceSite::Class(_) => return None,
    };

    let tokens = &result.tokens;
    let declaration = tokens
        .iter()
        .position(|t| t.declaration && t.kind == expected && matches_site(t, owner, name, descriptor));
    let Some(declaration) = declaration else {
        tracing::debug!(reference = %request.reference, "no declaration token for reference site");
        return None;
    };
    if expected == TokenKind::Field {
        return tokens.get(declaration);
    }

    let query: ReferenceKey = match request.query.parse() {
        Ok(query) => query,
        Err(_) => return tokens.get(declaration),
    };
    let found = tokens[declaration + 1..].iter().find(|t| match (&query, query.query_type()) {
        (ReferenceKey::Method { owner, name, .. }, _) if name == "<init>" && t.kind == TokenKind::Class => {
            t.class_name == *owner
        }
        (ReferenceKey::Method { name, descriptor, .. }, QueryType::Method) => {
            t.kind == TokenKind::Method
                && t.name.as_deref() == Some(name.as_str())
                && t.descriptor.as_deref() == Some(descriptor.as_str())
        }
        (ReferenceKey::Field { name, .. }, QueryType::Field) => {
            t.kind == TokenKind::Field && t.name.as_deref() == Some(name.as_str())
        }
        // Class queries jump to the first non-declaration use of the class
        // rather than yielding nothing.
        (ReferenceKey::Class(class), QueryType::Class) => {
            t.kind == TokenKind::Class && !t.declaration && t.class_name == *class
        }
        _ => false,
    });
    found.or_else(|| {
        tracing::debug!(query = %request.query, "no usage token after the site declaration; using the declaration");
        tokens.get(declaration)
    })
}
