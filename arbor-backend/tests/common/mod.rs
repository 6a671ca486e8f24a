//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

// Shared between the integration test binaries; not every binary uses
// every helper.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arbor_backend::{Context, Options, Phase, Plugin, Transaction};
use arbor_data::netconf::Validity;
use arbor_datastore::{Db, EditOp};
use arbor_xml::parse::parse_document;
use arbor_yang::SchemaStore;

pub const NETSYS_MODULE: &str = r#"
module netsys {
  namespace "urn:test:netsys";
  prefix net;

  revision 2023-01-01;

  container interfaces {
    list interface {
      key "name";
      leaf name {
        type string;
      }
      leaf mtu {
        type uint16 {
          range "68..9216";
        }
      }
    }
  }

  leaf default-interface {
    type leafref {
      path "/net:interfaces/net:interface/net:name";
    }
  }
}
"#;

static COUNTER: AtomicUsize = AtomicUsize::new(0);

pub fn test_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "arbor-backend-test-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed),
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// One recorded plugin event: callback name plus the diff counts the
/// plugin observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub plugin: String,
    pub phase: String,
    pub added: usize,
    pub deleted: usize,
    pub changed: usize,
}

#[derive(Default)]
pub struct RecorderLog {
    pub events: Vec<Event>,
}

impl RecorderLog {
    pub fn phases(&self, plugin: &str) -> Vec<String> {
        self.events
            .iter()
            .filter(|event| event.plugin == plugin)
            .map(|event| event.phase.clone())
            .collect()
    }
}

/// A test plugin that records every callback and can be told to fail in
/// one phase.
pub struct Recorder {
    name: String,
    log: Arc<Mutex<RecorderLog>>,
    fail_in: Option<Phase>,
}

impl Recorder {
    pub fn new(
        name: &str,
        log: Arc<Mutex<RecorderLog>>,
        fail_in: Option<Phase>,
    ) -> Recorder {
        Recorder {
            name: name.to_owned(),
            log,
            fail_in,
        }
    }

    fn record(&self, phase: Phase, tx: &Transaction) -> Result<(), String> {
        self.log.lock().unwrap().events.push(Event {
            plugin: self.name.clone(),
            phase: format!("{phase:?}").to_lowercase(),
            added: tx.added.len(),
            deleted: tx.deleted.len(),
            changed: tx.changed_src.len(),
        });
        if self.fail_in == Some(phase) {
            Err(format!("{} refuses {phase:?}", self.name))
        } else {
            Ok(())
        }
    }
}

impl Plugin for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn transaction_begin(&mut self, tx: &Transaction) -> Result<(), String> {
        self.record(Phase::Begin, tx)
    }

    fn transaction_validate(
        &mut self,
        tx: &Transaction,
    ) -> Result<(), String> {
        self.record(Phase::Validate, tx)
    }

    fn transaction_complete(
        &mut self,
        tx: &Transaction,
    ) -> Result<(), String> {
        self.record(Phase::Complete, tx)
    }

    fn transaction_commit(&mut self, tx: &Transaction) -> Result<(), String> {
        self.record(Phase::Commit, tx)
    }

    fn transaction_commit_done(
        &mut self,
        tx: &Transaction,
    ) -> Result<(), String> {
        self.record(Phase::CommitDone, tx)
    }

    fn transaction_end(&mut self, tx: &Transaction) -> Result<(), String> {
        self.record(Phase::End, tx)
    }

    fn transaction_abort(&mut self, tx: &Transaction) {
        let _ = self.record(Phase::Abort, tx);
    }
}

pub fn schema() -> SchemaStore {
    let mut store = SchemaStore::new();
    store.add_embedded_module("netsys", Some("2023-01-01"), NETSYS_MODULE);
    store.load_module("netsys", None).unwrap();
    store
}

pub fn test_context(dir: PathBuf) -> Context {
    let options = Options {
        datastore_dir: dir,
        record_modstate: false,
        ..Default::default()
    };
    let mut ctx = Context::new(options, schema()).unwrap();
    ctx.create_base_datastores().unwrap();
    ctx
}

/// Merges an edit into the candidate store.
pub fn put_candidate(ctx: &mut Context, body: &str) {
    let edit = parse_document(&format!(
        "<config xmlns=\"urn:test:netsys\">{body}</config>"
    ))
    .unwrap();
    let result = ctx
        .datastores
        .put(Db::Candidate, EditOp::Merge, &edit, &ctx.schema)
        .unwrap();
    assert_eq!(result, Validity::Valid, "candidate edit rejected");
}

/// The raw text of a store's file, for content comparisons.
pub fn db_text(ctx: &Context, db: Db) -> String {
    let path = ctx.options.datastore_dir.join(format!("{db}_db"));
    std::fs::read_to_string(path).unwrap_or_default()
}
