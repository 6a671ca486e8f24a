//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use crate::error::Error;
use crate::tree::{NodeId, NodeKind, XmlTree};

/// Parses a complete XML 1.0 document and returns a tree whose root is the
/// document element. DTD declarations are rejected.
pub fn parse_document(input: &str) -> Result<XmlTree, Error> {
    let mut tree = XmlTree::new("");
    let top = tree.root();
    let mut parser = Parser::new(input);
    parser.parse_content(&mut tree, top)?;
    parser.skip_whitespace();
    if !parser.at_end() {
        return Err(parser.malformed("content after document element"));
    }
    let mut elements = tree.child_elements(top);
    let document = elements
        .next()
        .ok_or_else(|| parser.malformed("no document element"))?;
    if elements.next().is_some() {
        return Err(parser.malformed("multiple document elements"));
    }
    drop(elements);
    tree.reroot(document);
    Ok(tree)
}

/// Parses zero or more sibling elements and attaches them under `parent`.
/// Used for edit-config payloads, changelog bodies and test fixtures.
pub fn parse_fragment(
    tree: &mut XmlTree,
    parent: NodeId,
    input: &str,
) -> Result<(), Error> {
    let mut parser = Parser::new(input);
    parser.parse_content(tree, parent)?;
    parser.skip_whitespace();
    if !parser.at_end() {
        return Err(parser.malformed("trailing garbage after fragment"));
    }
    Ok(())
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Parser<'a> {
        Parser {
            input,
            pos: 0,
            line: 1,
        }
    }

    fn malformed(&self, reason: &str) -> Error {
        Error::Malformed(self.line, reason.to_owned())
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    // Advances over one ASCII byte. Only called where the grammar guarantees
    // ASCII; text content goes through bump_char.
    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        if byte == b'\n' {
            self.line += 1;
        }
        self.pos += 1;
        Some(byte)
    }

    fn bump_char(&mut self) -> Option<char> {
        let ch = self.input[self.pos..].chars().next()?;
        if ch == '\n' {
            self.line += 1;
        }
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.input[self.pos..].starts_with(prefix)
    }

    fn expect(&mut self, prefix: &str) -> Result<(), Error> {
        if !self.starts_with(prefix) {
            return Err(self.malformed(&format!("expected \"{prefix}\"")));
        }
        for _ in 0..prefix.len() {
            self.bump();
        }
        Ok(())
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.bump();
        }
    }

    // Parses element content (markup and character data) into `parent` until
    // an end tag or end of input.
    fn parse_content(
        &mut self,
        tree: &mut XmlTree,
        parent: NodeId,
    ) -> Result<(), Error> {
        let mut text = String::new();
        loop {
            if self.at_end() || self.starts_with("</") {
                break;
            }
            if self.starts_with("<!--") {
                self.flush_text(tree, parent, &mut text);
                self.parse_comment(tree, parent)?;
            } else if self.starts_with("<![CDATA[") {
                self.parse_cdata(&mut text)?;
            } else if self.starts_with("<!") {
                return Err(Error::DtdForbidden(self.line));
            } else if self.starts_with("<?") {
                self.flush_text(tree, parent, &mut text);
                self.parse_pi(tree, parent)?;
            } else if self.starts_with("<") {
                self.flush_text(tree, parent, &mut text);
                self.parse_element(tree, parent)?;
            } else {
                self.parse_chardata(&mut text)?;
            }
        }
        self.flush_text(tree, parent, &mut text);
        Ok(())
    }

    // Whitespace-only character data between elements is insignificant and
    // dropped; anything else becomes a body node.
    fn flush_text(
        &mut self,
        tree: &mut XmlTree,
        parent: NodeId,
        text: &mut String,
    ) {
        if text.trim().is_empty() {
            text.clear();
            return;
        }
        let body = tree.new_node(parent, NodeKind::Body, "");
        tree.set_value(body, text.trim());
        text.clear();
    }

    fn parse_chardata(&mut self, text: &mut String) -> Result<(), Error> {
        while let Some(byte) = self.peek() {
            match byte {
                b'<' => break,
                b'&' => {
                    self.bump();
                    text.push(self.parse_entity()?);
                }
                _ => {
                    text.push(self.bump_char().unwrap());
                }
            }
        }
        Ok(())
    }

    fn parse_entity(&mut self) -> Result<char, Error> {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if byte == b';' {
                let name = self.input[start..self.pos].to_owned();
                self.bump();
                return match name.as_str() {
                    "lt" => Ok('<'),
                    "gt" => Ok('>'),
                    "amp" => Ok('&'),
                    "apos" => Ok('\''),
                    "quot" => Ok('"'),
                    _ if name.starts_with("#x") || name.starts_with("#X") => {
                        u32::from_str_radix(&name[2..], 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or(Error::BadEntity(self.line, name))
                    }
                    _ if name.starts_with('#') => name[1..]
                        .parse::<u32>()
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or(Error::BadEntity(self.line, name)),
                    _ => Err(Error::BadEntity(self.line, name)),
                };
            }
            if !byte.is_ascii_alphanumeric() && byte != b'#' {
                break;
            }
            self.bump();
        }
        Err(Error::BadEntity(self.line, "unterminated".to_owned()))
    }

    fn parse_comment(
        &mut self,
        tree: &mut XmlTree,
        parent: NodeId,
    ) -> Result<(), Error> {
        self.expect("<!--")?;
        let start = self.pos;
        while !self.at_end() && !self.starts_with("-->") {
            self.bump_char();
        }
        let text = self.input[start..self.pos].to_owned();
        self.expect("-->")?;
        let comment = tree.new_node(parent, NodeKind::Comment, "");
        tree.set_value(comment, &text);
        Ok(())
    }

    fn parse_cdata(&mut self, text: &mut String) -> Result<(), Error> {
        self.expect("<![CDATA[")?;
        let start = self.pos;
        while !self.at_end() && !self.starts_with("]]>") {
            self.bump_char();
        }
        text.push_str(&self.input[start..self.pos]);
        self.expect("]]>")
    }

    fn parse_pi(
        &mut self,
        tree: &mut XmlTree,
        parent: NodeId,
    ) -> Result<(), Error> {
        self.expect("<?")?;
        let target = self.parse_name()?;
        let start = self.pos;
        while !self.at_end() && !self.starts_with("?>") {
            self.bump_char();
        }
        let content = self.input[start..self.pos].trim().to_owned();
        self.expect("?>")?;
        // The XML declaration is consumed, not represented.
        if !target.eq_ignore_ascii_case("xml") {
            let pi = tree.new_node(parent, NodeKind::Pi, &target);
            tree.set_value(pi, &content);
        }
        Ok(())
    }

    fn parse_element(
        &mut self,
        tree: &mut XmlTree,
        parent: NodeId,
    ) -> Result<(), Error> {
        self.expect("<")?;
        let (prefix, name) = self.parse_qname()?;
        let element = tree.new_element(parent, prefix.as_deref(), &name);
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'/') => {
                    self.expect("/>")?;
                    return Ok(());
                }
                Some(b'>') => {
                    self.bump();
                    break;
                }
                Some(_) => self.parse_attribute(tree, element)?,
                None => return Err(self.malformed("unterminated start tag")),
            }
        }
        self.parse_content(tree, element)?;
        self.expect("</")?;
        let (end_prefix, end_name) = self.parse_qname()?;
        if end_prefix != prefix || end_name != name {
            return Err(self.malformed(&format!(
                "mismatched end tag </{end_name}>, expected </{name}>"
            )));
        }
        self.skip_whitespace();
        self.expect(">")
    }

    fn parse_attribute(
        &mut self,
        tree: &mut XmlTree,
        element: NodeId,
    ) -> Result<(), Error> {
        let (prefix, name) = self.parse_qname()?;
        self.skip_whitespace();
        self.expect("=")?;
        self.skip_whitespace();
        let quote = match self.bump() {
            Some(quote @ (b'"' | b'\'')) => quote,
            _ => return Err(self.malformed("attribute value must be quoted")),
        };
        let mut value = String::new();
        loop {
            match self.peek() {
                Some(byte) if byte == quote => {
                    self.bump();
                    break;
                }
                Some(b'&') => {
                    self.bump();
                    value.push(self.parse_entity()?);
                }
                Some(_) => value.push(self.bump_char().unwrap()),
                None => {
                    return Err(self.malformed("unterminated attribute value"));
                }
            }
        }
        // Namespace declarations go to the prefix map, not the attribute
        // list.
        match (prefix.as_deref(), name.as_str()) {
            (None, "xmlns") => tree.add_ns_decl(element, None, &value),
            (Some("xmlns"), decl_prefix) => {
                tree.add_ns_decl(element, Some(decl_prefix), &value)
            }
            _ => tree.add_attr(element, prefix.as_deref(), &name, &value),
        }
        Ok(())
    }

    fn parse_qname(&mut self) -> Result<(Option<String>, String), Error> {
        let first = self.parse_name()?;
        if self.peek() == Some(b':') {
            self.bump();
            let second = self.parse_name()?;
            Ok((Some(first), second))
        } else {
            Ok((None, first))
        }
    }

    fn parse_name(&mut self) -> Result<String, Error> {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_alphanumeric()
                || matches!(byte, b'_' | b'-' | b'.')
                || byte >= 0x80
            {
                self.bump_char();
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.malformed("expected a name"));
        }
        Ok(self.input[start..self.pos].to_owned())
    }
}
