use crate::{PackError, Result};
use oxc_allocator::Allocator;
use oxc_ast::ast::{
    Argument, CallExpression, ExportAllDeclaration, ExportNamedDeclaration, Expression,
    ImportDeclaration, ImportExpression,
};
use oxc_ast::Visit;
use oxc_ast::visit::walk;
use oxc_parser::Parser;
use oxc_span::SourceType;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

fn base_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(@[^/]+/[^/]+|[^/]+)").expect("valid base name regex"))
}

/// `@scope/pkg/sub/path` -> `@scope/pkg`, `pkg/sub` -> `pkg`.
pub fn base_dep_name(specifier: &str) -> Option<&str> {
    base_name_pattern()
        .find(specifier)
        .map(|found| found.as_str())
}

/// Lists the base package names a compiled bundle references at runtime.
pub fn deps_from_bundle(path: &Path, esm: bool) -> Result<Vec<String>> {
    let source = fs::read_to_string(path).map_err(|source| PackError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;

    deps_from_source(&source, esm).map_err(|reason| PackError::ParseBundle {
        path: path.to_path_buf(),
        reason,
    })
}

pub fn deps_from_source(source: &str, esm: bool) -> std::result::Result<Vec<String>, String> {
    let allocator = Allocator::default();
    let source_type = SourceType::default().with_module(esm);
    let parsed = Parser::new(&allocator, source, source_type).parse();

    if parsed.panicked || !parsed.errors.is_empty() {
        let reason = parsed
            .errors
            .first()
            .map(|error| error.to_string())
            .unwrap_or_else(|| "parser aborted".to_string());
        return Err(reason);
    }

    let mut collector = SpecifierCollector {
        esm,
        specifiers: Vec::new(),
    };
    collector.visit_program(&parsed.program);

    let mut names: Vec<String> = Vec::new();

    for specifier in collector.specifiers {
        if let Some(base) = base_dep_name(&specifier)
            && !names.iter().any(|name| name == base)
        {
            names.push(base.to_string());
        }
    }

    Ok(names)
}

struct SpecifierCollector {
    esm: bool,
    specifiers: Vec<String>,
}

impl<'a> Visit<'a> for SpecifierCollector {
    fn visit_import_declaration(&mut self, it: &ImportDeclaration<'a>) {
        if self.esm {
            self.specifiers.push(it.source.value.to_string());
        }
    }

    fn visit_export_all_declaration(&mut self, it: &ExportAllDeclaration<'a>) {
        if self.esm {
            self.specifiers.push(it.source.value.to_string());
        }
    }

    fn visit_export_named_declaration(&mut self, it: &ExportNamedDeclaration<'a>) {
        if self.esm
            && let Some(source) = &it.source
        {
            self.specifiers.push(source.value.to_string());
        }

        walk::walk_export_named_declaration(self, it);
    }

    fn visit_import_expression(&mut self, it: &ImportExpression<'a>) {
        if self.esm
            && let Expression::StringLiteral(literal) = &it.source
        {
            self.specifiers.push(literal.value.to_string());
        }

        walk::walk_import_expression(self, it);
    }

    fn visit_call_expression(&mut self, it: &CallExpression<'a>) {
        if !self.esm
            && let Expression::Identifier(callee) = &it.callee
            && callee.name.as_str() == "require"
            && let Some(Argument::StringLiteral(literal)) = it.arguments.first()
        {
            self.specifiers.push(literal.value.to_string());
        }

        walk::walk_call_expression(self, it);
    }
}
