use crate::extractor::{LanguageParser, ParsedFile, RawRelation, RawSymbol};
use crate::model::RelationKind;
use anyhow::Result;
use tree_sitter::{Node, Parser};

/// Go source parser built on tree-sitter. Emits raw symbols for functions,
/// methods, type declarations, constants, and variables, plus unresolved
/// relation hints (calls, uses_type, belongs_to, instantiates, embeds) with
/// line-level evidence.
pub struct GoParser {
    parser: Parser,
}

impl GoParser {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let language = tree_sitter_go::LANGUAGE;
        parser.set_language(&language.into())?;
        Ok(Self { parser })
    }
}

impl LanguageParser for GoParser {
    fn language(&self) -> &'static str {
        "go"
    }

    fn parse_file(&mut self, path: &str, source: &str) -> Result<ParsedFile> {
        let tree = match self.parser.parse(source, None) {
            Some(tree) => tree,
            None => anyhow::bail!("tree-sitter failed to parse {path}"),
        };
        let root = tree.root_node();
        let bytes = source.as_bytes();

        let mut out = ParsedFile {
            package_name: package_name(root, bytes).unwrap_or_else(|| "main".to_string()),
            symbols: Vec::new(),
        };

        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            match child.kind() {
                "function_declaration" => {
                    if let Some(sym) = extract_function(child, bytes, false) {
                        out.symbols.push(sym);
                    }
                }
                "method_declaration" => {
                    if let Some(sym) = extract_function(child, bytes, true) {
                        out.symbols.push(sym);
                    }
                }
                "type_declaration" => {
                    extract_type_declaration(child, bytes, &mut out.symbols);
                }
                "const_declaration" => {
                    extract_value_declaration(child, bytes, "constant", &mut out.symbols);
                }
                "var_declaration" => {
                    extract_value_declaration(child, bytes, "variable", &mut out.symbols);
                }
                _ => {}
            }
        }

        Ok(out)
    }
}

fn package_name(root: Node<'_>, source: &[u8]) -> Option<String> {
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        if child.kind() == "package_clause" {
            let mut inner = child.walk();
            for part in child.named_children(&mut inner) {
                if part.kind() == "package_identifier" {
                    return text(part, source);
                }
            }
        }
    }
    None
}

fn extract_function(node: Node<'_>, source: &[u8], is_method: bool) -> Option<RawSymbol> {
    let name_node = node.child_by_field_name("name")?;
    let name = text(name_node, source)?;
    let body_text = text(node, source)?;
    let mut relations = Vec::new();

    let mut receiver = String::new();
    if is_method {
        if let Some(recv) = node.child_by_field_name("receiver") {
            receiver = receiver_base_type(recv, source).unwrap_or_default();
            if !receiver.is_empty() {
                relations.push(relation(RelationKind::BelongsTo, &receiver, recv));
            }
        }
    }

    if let Some(params) = node.child_by_field_name("parameters") {
        collect_type_mentions(params, source, RelationKind::UsesType, &mut relations);
    }
    if let Some(result) = node.child_by_field_name("result") {
        collect_type_mentions(result, source, RelationKind::UsesType, &mut relations);
    }

    let signature = match node.child_by_field_name("body") {
        Some(body) => {
            collect_body_relations(body, source, &mut relations);
            let sig_end = body.start_byte();
            let sig_start = node.start_byte();
            std::str::from_utf8(&source[sig_start..sig_end])
                .ok()
                .map(str::trim)
                .map(str::to_string)
                .unwrap_or_default()
        }
        None => body_text.clone(),
    };

    Some(RawSymbol {
        kind: if is_method { "method" } else { "function" }.to_string(),
        name,
        start_line: line(node.start_position().row),
        end_line: line(node.end_position().row),
        body: body_text,
        doc: doc_comment(node, source),
        signature,
        receiver,
        relations,
    })
}

fn receiver_base_type(recv: Node<'_>, source: &[u8]) -> Option<String> {
    // receiver is a parameter_list with a single parameter_declaration
    let mut cursor = recv.walk();
    for child in recv.named_children(&mut cursor) {
        if child.kind() == "parameter_declaration" {
            if let Some(type_node) = child.child_by_field_name("type") {
                let raw = text(type_node, source)?;
                return Some(crate::graph::strip_type_sigils(&raw).to_string());
            }
        }
    }
    None
}

fn extract_type_declaration(node: Node<'_>, source: &[u8], out: &mut Vec<RawSymbol>) {
    let body_text = match text(node, source) {
        Some(t) => t,
        None => return,
    };
    let doc = doc_comment(node, source);

    let mut cursor = node.walk();
    for spec in node.named_children(&mut cursor) {
        if spec.kind() != "type_spec" {
            continue;
        }
        let Some(name_node) = spec.child_by_field_name("name") else {
            continue;
        };
        let Some(name) = text(name_node, source) else {
            continue;
        };
        let Some(type_node) = spec.child_by_field_name("type") else {
            continue;
        };

        let mut relations = Vec::new();
        let kind = match type_node.kind() {
            "struct_type" => {
                collect_struct_relations(type_node, source, &mut relations);
                "struct"
            }
            "interface_type" => {
                collect_interface_relations(type_node, source, &mut relations);
                "interface"
            }
            _ => {
                collect_type_mentions(type_node, source, RelationKind::UsesType, &mut relations);
                "type"
            }
        };

        out.push(RawSymbol {
            kind: kind.to_string(),
            name,
            start_line: line(node.start_position().row),
            end_line: line(node.end_position().row),
            body: body_text.clone(),
            doc: doc.clone(),
            signature: text(spec, source).unwrap_or_default(),
            receiver: String::new(),
            relations,
        });
    }
}

fn collect_struct_relations(struct_node: Node<'_>, source: &[u8], out: &mut Vec<RawRelation>) {
    let mut cursor = struct_node.walk();
    for child in struct_node.named_children(&mut cursor) {
        if child.kind() != "field_declaration_list" {
            continue;
        }
        let mut fields = child.walk();
        for field in child.named_children(&mut fields) {
            if field.kind() != "field_declaration" {
                continue;
            }
            let type_node = field.child_by_field_name("type");
            let mut names = field.walk();
            let has_name = field
                .named_children(&mut names)
                .any(|n| n.kind() == "field_identifier");
            if let Some(type_node) = type_node {
                if let Some(type_text) = text(type_node, source) {
                    // An anonymous field embeds its type.
                    let kind = if has_name {
                        RelationKind::UsesType
                    } else {
                        RelationKind::Embeds
                    };
                    out.push(relation(kind, &type_text, type_node));
                }
            } else if let Some(embedded) = text(field, source) {
                out.push(relation(RelationKind::Embeds, embedded.trim(), field));
            }
        }
    }
}

fn collect_interface_relations(interface_node: Node<'_>, source: &[u8], out: &mut Vec<RawRelation>) {
    let mut cursor = interface_node.walk();
    for child in interface_node.named_children(&mut cursor) {
        match child.kind() {
            // Embedded interface: a bare type name among the members.
            "type_identifier" | "qualified_type" | "type_elem" => {
                if let Some(t) = text(child, source) {
                    if !t.contains('(') {
                        out.push(relation(RelationKind::Embeds, t.trim(), child));
                    }
                }
            }
            "method_elem" | "method_spec" => {
                if let Some(params) = child.child_by_field_name("parameters") {
                    collect_type_mentions(params, source, RelationKind::UsesType, out);
                }
                if let Some(result) = child.child_by_field_name("result") {
                    collect_type_mentions(result, source, RelationKind::UsesType, out);
                }
            }
            _ => {}
        }
    }
}

fn extract_value_declaration(
    node: Node<'_>,
    source: &[u8],
    kind: &str,
    out: &mut Vec<RawSymbol>,
) {
    let doc = doc_comment(node, source);
    let mut cursor = node.walk();
    for spec in node.named_children(&mut cursor) {
        if spec.kind() != "const_spec" && spec.kind() != "var_spec" {
            continue;
        }
        let mut relations = Vec::new();
        if let Some(type_node) = spec.child_by_field_name("type") {
            collect_type_mentions(type_node, source, RelationKind::UsesType, &mut relations);
        }
        let spec_text = text(spec, source).unwrap_or_default();

        let mut names = spec.walk();
        for name_node in spec.named_children(&mut names) {
            if name_node.kind() != "identifier" {
                continue;
            }
            let Some(name) = text(name_node, source) else {
                continue;
            };
            out.push(RawSymbol {
                kind: kind.to_string(),
                name,
                start_line: line(spec.start_position().row),
                end_line: line(spec.end_position().row),
                body: spec_text.clone(),
                doc: doc.clone(),
                signature: String::new(),
                receiver: String::new(),
                relations: relations.clone(),
            });
        }
    }
}

/// Calls and composite-literal instantiations inside a function body.
fn collect_body_relations(body: Node<'_>, source: &[u8], out: &mut Vec<RawRelation>) {
    let mut stack = vec![body];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "call_expression" => {
                if let Some(function) = node.child_by_field_name("function") {
                    match function.kind() {
                        "identifier" | "selector_expression" => {
                            if let Some(t) = text(function, source) {
                                out.push(relation(RelationKind::Calls, &t, node));
                            }
                        }
                        _ => {}
                    }
                }
            }
            "composite_literal" => {
                if let Some(type_node) = node.child_by_field_name("type") {
                    if matches!(
                        type_node.kind(),
                        "type_identifier" | "qualified_type" | "pointer_type"
                    ) {
                        if let Some(t) = text(type_node, source) {
                            out.push(relation(RelationKind::Instantiates, &t, node));
                        }
                    }
                }
            }
            _ => {}
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            stack.push(child);
        }
    }
}

/// Named type mentions in parameter lists, results, and field types.
fn collect_type_mentions(
    node: Node<'_>,
    source: &[u8],
    kind: RelationKind,
    out: &mut Vec<RawRelation>,
) {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        match current.kind() {
            "type_identifier" | "qualified_type" => {
                if let Some(t) = text(current, source) {
                    out.push(relation(kind, &t, current));
                }
                continue;
            }
            _ => {}
        }
        let mut cursor = current.walk();
        for child in current.named_children(&mut cursor) {
            stack.push(child);
        }
    }
}

/// Walk backwards over adjacent `//` comment siblings.
fn doc_comment(node: Node<'_>, source: &[u8]) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current = node;
    while let Some(prev) = current.prev_sibling() {
        if prev.kind() != "comment" {
            break;
        }
        if current.start_position().row as i64 - prev.end_position().row as i64 > 1 {
            break;
        }
        if let Some(t) = text(prev, source) {
            lines.insert(0, clean_comment_line(&t));
        }
        current = prev;
    }
    lines.join("\n").trim().to_string()
}

fn clean_comment_line(raw: &str) -> String {
    raw.trim()
        .trim_start_matches("//")
        .trim_start_matches("/*")
        .trim_end_matches("*/")
        .trim()
        .to_string()
}

fn relation(kind: RelationKind, target: &str, node: Node<'_>) -> RawRelation {
    RawRelation {
        target: target.to_string(),
        kind,
        start_line: line(node.start_position().row),
        end_line: line(node.end_position().row),
    }
}

fn text(node: Node<'_>, source: &[u8]) -> Option<String> {
    node.utf8_text(source).ok().map(str::to_string)
}

fn line(row: usize) -> i64 {
    row as i64 + 1
}
