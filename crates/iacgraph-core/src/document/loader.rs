use crate::document::{DocKey, DocNode, DocValue, Scalar, TemplateDocument};
use crate::error::{IacError, Result};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use yaml_rust2::parser::{Event, MarkedEventReceiver, Parser};
use yaml_rust2::scanner::{Marker, TScalarStyle};
use yaml_rust2::Yaml;

/// Read and parse a template file.
pub fn load_template(path: &Path) -> Result<TemplateDocument> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(IacError::FileNotFound(path.to_path_buf()))
        }
        Err(e) if e.kind() == ErrorKind::InvalidData => {
            return Err(IacError::parse(
                &path.display().to_string(),
                "file is not valid UTF-8",
            ))
        }
        Err(source) => {
            return Err(IacError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    parse_template(&content, &path.display().to_string())
}

/// Parse template text (YAML or JSON) into a line-tracked document.
///
/// The YAML parser also decodes JSON, so one event stream serves both formats. Only the
/// first document of a multi-document stream is used. CloudFormation short-form tags
/// (`!Ref`, `!GetAtt`, `!If`, ...) are rewritten into their long `{"Fn::X": ...}` form.
pub fn parse_template(content: &str, path: &str) -> Result<TemplateDocument> {
    let mut builder = DocumentBuilder::default();
    let mut parser = Parser::new(content.chars());
    parser
        .load(&mut builder, false)
        .map_err(|e| IacError::parse(path, e.to_string()))?;

    if let Some(message) = builder.error {
        return Err(IacError::parse(path, message));
    }
    let root = builder
        .root
        .ok_or_else(|| IacError::parse(path, "template is empty"))?;

    Ok(TemplateDocument {
        path: path.to_string(),
        root,
    })
}

enum FrameKind {
    Mapping {
        entries: Vec<(DocKey, DocNode)>,
        pending_key: Option<DocKey>,
    },
    Sequence(Vec<DocNode>),
}

struct Frame {
    kind: FrameKind,
    line: usize,
    anchor: usize,
    short_form: Option<String>,
}

impl Frame {
    fn into_node(self) -> (DocNode, usize) {
        let value = match self.kind {
            FrameKind::Mapping { entries, .. } => DocValue::Mapping(entries),
            FrameKind::Sequence(items) => DocValue::Sequence(items),
        };
        let node = wrap_short_form(
            self.short_form,
            DocNode {
                value,
                line: self.line,
            },
        );
        (node, self.anchor)
    }
}

#[derive(Default)]
struct DocumentBuilder {
    stack: Vec<Frame>,
    anchors: HashMap<usize, DocNode>,
    root: Option<DocNode>,
    error: Option<String>,
}

impl DocumentBuilder {
    fn finish(&mut self, node: DocNode, anchor: usize) {
        if anchor > 0 {
            self.anchors.insert(anchor, node.clone());
        }
        if let Err(message) = self.push(node) {
            self.error = Some(message);
        }
    }

    fn push(&mut self, node: DocNode) -> std::result::Result<(), String> {
        let Some(frame) = self.stack.last_mut() else {
            if self.root.is_none() {
                self.root = Some(node);
            }
            return Ok(());
        };

        match &mut frame.kind {
            FrameKind::Sequence(items) => items.push(node),
            FrameKind::Mapping {
                entries,
                pending_key,
            } => match pending_key.take() {
                None => {
                    let DocValue::Scalar(name) = &node.value else {
                        return Err(format!("line {}: mapping keys must be scalars", node.line));
                    };
                    *pending_key = Some(DocKey {
                        name: name.to_string(),
                        line: node.line,
                    });
                }
                Some(key) => {
                    if entries.iter().any(|(existing, _)| existing.name == key.name) {
                        return Err(format!("line {}: duplicate key '{}'", key.line, key.name));
                    }
                    entries.push((key, node));
                }
            },
        }
        Ok(())
    }

    fn open(&mut self, kind: FrameKind, line: usize, anchor: usize, short_form: Option<String>) {
        self.stack.push(Frame {
            kind,
            line,
            anchor,
            short_form,
        });
    }

    fn close(&mut self) {
        if let Some(frame) = self.stack.pop() {
            let (node, anchor) = frame.into_node();
            self.finish(node, anchor);
        }
    }
}

impl MarkedEventReceiver for DocumentBuilder {
    fn on_event(&mut self, ev: Event, mark: Marker) {
        if self.error.is_some() {
            return;
        }
        let line = mark.line();

        match ev {
            Event::Scalar(raw, style, anchor, tag) => {
                let tag = tag.as_ref().map(|t| (t.handle.as_str(), t.suffix.as_str()));
                let forced_string = matches!(tag, Some((handle, "str")) if is_core_handle(handle));
                let scalar = if matches!(style, TScalarStyle::Plain) && !forced_string {
                    resolve_plain(&raw)
                } else {
                    Scalar::Str(raw)
                };
                let short_form = tag.and_then(|(handle, suffix)| short_form_key(handle, suffix));
                let node = wrap_short_form(short_form, DocNode::scalar(scalar, line));
                self.finish(node, anchor);
            }
            Event::SequenceStart(anchor, tag) => {
                let short_form = tag
                    .as_ref()
                    .and_then(|t| short_form_key(&t.handle, &t.suffix));
                self.open(FrameKind::Sequence(Vec::new()), line, anchor, short_form);
            }
            Event::MappingStart(anchor, tag) => {
                let short_form = tag
                    .as_ref()
                    .and_then(|t| short_form_key(&t.handle, &t.suffix));
                self.open(
                    FrameKind::Mapping {
                        entries: Vec::new(),
                        pending_key: None,
                    },
                    line,
                    anchor,
                    short_form,
                );
            }
            Event::SequenceEnd | Event::MappingEnd => self.close(),
            Event::Alias(id) => match self.anchors.get(&id).cloned() {
                Some(node) => {
                    if let Err(message) = self.push(node) {
                        self.error = Some(message);
                    }
                }
                None => self.error = Some(format!("line {}: unknown alias", line)),
            },
            _ => {}
        }
    }
}

fn is_core_handle(handle: &str) -> bool {
    handle == "!!" || handle == "tag:yaml.org,2002:"
}

/// `!Ref` -> `Ref`, `!Condition` -> `Condition`, `!GetAtt` -> `Fn::GetAtt`.
fn short_form_key(handle: &str, suffix: &str) -> Option<String> {
    if handle != "!" || suffix.is_empty() {
        return None;
    }
    Some(match suffix {
        "Ref" | "Condition" => suffix.to_string(),
        _ => format!("Fn::{}", suffix),
    })
}

fn wrap_short_form(short_form: Option<String>, node: DocNode) -> DocNode {
    match short_form {
        Some(name) => {
            let line = node.line;
            DocNode {
                value: DocValue::Mapping(vec![(DocKey { name, line }, node)]),
                line,
            }
        }
        None => node,
    }
}

fn resolve_plain(raw: &str) -> Scalar {
    match Yaml::from_str(raw) {
        Yaml::Integer(i) => Scalar::Int(i),
        Yaml::Real(text) => text
            .parse::<f64>()
            .map(Scalar::Float)
            .unwrap_or_else(|_| Scalar::Str(raw.to_string())),
        Yaml::Boolean(b) => Scalar::Bool(b),
        Yaml::Null => Scalar::Null,
        _ => Scalar::Str(raw.to_string()),
    }
}
