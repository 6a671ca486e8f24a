//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::{debug, warn};

use arbor_data::netconf::{RpcError, Validity};
use arbor_xml::parse::parse_document;
use arbor_xml::xpath::{self, Context};
use arbor_xml::{NodeId, NsCtx, XmlTree};
use arbor_yang::SchemaStore;

use crate::error::Error;
use crate::modstate::ModStateDiff;

/// A declarative upgrade program: per module and revision interval, an
/// ordered list of rename/replace/insert/delete/move steps rewriting
/// stored XML into the shape of the current schema.
///
/// The document looks like:
///
/// ```xml
/// <changelogs xmlns="urn:arbor:changelog">
///   <changelog>
///     <namespace>urn:example:mod</namespace>
///     <revfrom>2020-01-01</revfrom>
///     <revision>2023-01-01</revision>
///     <step>
///       <op>rename</op>
///       <where>/old</where>
///       <tag>'new'</tag>
///     </step>
///   </changelog>
/// </changelogs>
/// ```
#[derive(Clone, Debug)]
pub struct Changelog {
    doc: XmlTree,
}

// ===== impl Changelog =====

impl Changelog {
    pub fn load(path: &str) -> Result<Changelog, Error> {
        let text = std::fs::read_to_string(path)
            .map_err(|error| Error::Io(path.to_owned(), error))?;
        Changelog::from_string(&text)
    }

    pub fn from_string(text: &str) -> Result<Changelog, Error> {
        Ok(Changelog {
            doc: parse_document(text)?,
        })
    }

    /// Applies every changelog entry selected by the module-state diff to
    /// `tree`. For a module whose stored revision `from` differs from the
    /// running revision `to`, entries with a target revision inside
    /// `(from, to]` apply, in document order.
    pub fn upgrade(
        &self,
        tree: &mut XmlTree,
        msdiff: &ModStateDiff,
        schema: &SchemaStore,
    ) -> Result<Validity, Error> {
        for (module, from, to) in msdiff.revision_changes() {
            let Some(namespace) = schema
                .module_by_name(module)
                .map(|module| module.namespace.clone())
            else {
                warn!(%module, "revision change for an unknown module");
                continue;
            };
            for entry in self.entries_for(&namespace, from, to) {
                debug!(%module, %from, %to, "applying changelog entry");
                match self.apply_entry(tree, entry, schema)? {
                    Validity::Valid => (),
                    invalid => return Ok(invalid),
                }
            }
        }
        Ok(Validity::Valid)
    }

    // Entries for one namespace whose revision lands in (from, to].
    // Revision dates compare lexically (YYYY-MM-DD).
    fn entries_for(
        &self,
        namespace: &str,
        from: &str,
        to: &str,
    ) -> Vec<NodeId> {
        self.doc
            .child_elements(self.doc.root())
            .filter(|entry| self.doc.name(*entry) == "changelog")
            .filter(|entry| {
                self.doc.find_body(*entry, "namespace") == Some(namespace)
            })
            .filter(|entry| {
                let revision =
                    self.doc.find_body(*entry, "revision").unwrap_or("");
                let revfrom = self.doc.find_body(*entry, "revfrom");
                (from.is_empty() || revision > from)
                    && revision <= to
                    && revfrom.is_none_or(|revfrom| {
                        from.is_empty() || revfrom >= from
                    })
            })
            .collect()
    }

    fn apply_entry(
        &self,
        tree: &mut XmlTree,
        entry: NodeId,
        schema: &SchemaStore,
    ) -> Result<Validity, Error> {
        for step in self
            .doc
            .child_elements(entry)
            .filter(|step| self.doc.name(*step) == "step")
            .collect::<Vec<_>>()
        {
            match self.apply_step(tree, step, schema)? {
                Validity::Valid => (),
                invalid => return Ok(invalid),
            }
        }
        Ok(Validity::Valid)
    }

    fn apply_step(
        &self,
        tree: &mut XmlTree,
        step: NodeId,
        schema: &SchemaStore,
    ) -> Result<Validity, Error> {
        let Some(op) = self.doc.find_body(step, "op") else {
            return Ok(Validity::Valid);
        };
        let op = op.to_owned();
        let Some(where_xpath) = self.doc.find_body(step, "where") else {
            return Ok(Validity::Valid);
        };
        // The step's own namespace scope qualifies its expressions.
        let nsctx = NsCtx::from_node(&self.doc, step);
        let when_xpath = self.doc.find_body(step, "when").map(str::to_owned);

        let parsed = xpath::parse(where_xpath)?;
        let matches = {
            let ctx = Context::new(tree, Some(schema), &nsctx, tree.root());
            xpath::eval_nodeset(&parsed, &ctx, tree.root())?
        };

        for matched in matches {
            // An earlier operation may have purged this match.
            if !tree.contains(matched) {
                continue;
            }
            // A false `when` skips this match only.
            if let Some(when_xpath) = &when_xpath {
                let when = xpath::parse(when_xpath)?;
                let ctx = Context::new(tree, Some(schema), &nsctx, matched);
                if !xpath::eval_boolean(&when, &ctx, matched)? {
                    continue;
                }
            }
            let outcome = match op.as_str() {
                "rename" => self.op_rename(tree, step, matched, &nsctx)?,
                "replace" => self.op_replace(tree, step, matched)?,
                "insert" => self.op_insert(tree, step, matched)?,
                "delete" => {
                    tree.purge(matched);
                    Validity::Valid
                }
                "move" => {
                    self.op_move(tree, step, matched, &nsctx, schema)?
                }
                other => Validity::Invalid(RpcError::operation_failed(
                    format!("unknown changelog operation \"{other}\""),
                )),
            };
            match outcome {
                Validity::Valid => (),
                invalid => return Ok(invalid),
            }
        }
        Ok(Validity::Valid)
    }

    // The new name is the string value of the `tag` expression evaluated
    // in the match's context.
    fn op_rename(
        &self,
        tree: &mut XmlTree,
        step: NodeId,
        matched: NodeId,
        nsctx: &NsCtx,
    ) -> Result<Validity, Error> {
        let Some(tag) = self.doc.find_body(step, "tag") else {
            return Ok(Validity::Invalid(RpcError::operation_failed(
                "rename step without a tag expression",
            )));
        };
        let parsed = xpath::parse(tag)?;
        let name = {
            let ctx = Context::new(tree, None, nsctx, matched);
            xpath::eval_string(&parsed, &ctx, matched)?
        };
        if name.is_empty() {
            return Ok(Validity::Invalid(RpcError::operation_failed(
                format!("rename tag \"{tag}\" produced an empty name"),
            )));
        }
        tree.set_name(matched, &name);
        Ok(Validity::Valid)
    }

    // Deletes the children of the match and attaches a deep copy of the
    // single child of `new`.
    fn op_replace(
        &self,
        tree: &mut XmlTree,
        step: NodeId,
        matched: NodeId,
    ) -> Result<Validity, Error> {
        let Some(new) = self.doc.find_child(step, None, "new") else {
            return Ok(Validity::Invalid(RpcError::operation_failed(
                "replace step without new content",
            )));
        };
        let new_children = self.doc.child_elements(new).collect::<Vec<_>>();
        let [single] = new_children.as_slice() else {
            return Ok(Validity::Invalid(RpcError::operation_failed(
                "replace step needs exactly one child under <new>",
            )));
        };
        tree.purge_children(matched);
        tree.copy_from(matched, &self.doc, *single);
        Ok(Validity::Valid)
    }

    // Attaches copies of all children of `new` to the match.
    fn op_insert(
        &self,
        tree: &mut XmlTree,
        step: NodeId,
        matched: NodeId,
    ) -> Result<Validity, Error> {
        let Some(new) = self.doc.find_child(step, None, "new") else {
            return Ok(Validity::Invalid(RpcError::operation_failed(
                "insert step without new content",
            )));
        };
        for child in self.doc.child_elements(new).collect::<Vec<_>>() {
            tree.copy_from(matched, &self.doc, child);
        }
        Ok(Validity::Valid)
    }

    // Detaches the match and re-attaches it under the single node selected
    // by `dst`.
    fn op_move(
        &self,
        tree: &mut XmlTree,
        step: NodeId,
        matched: NodeId,
        nsctx: &NsCtx,
        schema: &SchemaStore,
    ) -> Result<Validity, Error> {
        let Some(dst) = self.doc.find_body(step, "dst") else {
            return Ok(Validity::Invalid(RpcError::operation_failed(
                "move step without a destination",
            )));
        };
        let parsed = xpath::parse(dst)?;
        let destinations = {
            let ctx = Context::new(tree, Some(schema), nsctx, tree.root());
            xpath::eval_nodeset(&parsed, &ctx, tree.root())?
        };
        let [destination] = destinations.as_slice() else {
            return Ok(Validity::Invalid(RpcError::operation_failed(
                format!("move destination \"{dst}\" is not a single node"),
            )));
        };
        tree.adopt(*destination, matched);
        Ok(Validity::Valid)
    }
}
