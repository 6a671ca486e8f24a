//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

mod common;

use std::sync::{Arc, Mutex};

use arbor_backend::commit::{
    candidate_commit, candidate_validate, discard_changes, load_failsafe,
    restart_one, startup_commit,
};
use arbor_backend::{Error, Phase};
use arbor_data::bind::BindMode;
use arbor_data::netconf::Validity;
use arbor_data::ErrorTag;
use arbor_datastore::{Changelog, Db};
use arbor_xml::XmlFlags;

use common::{
    Recorder, RecorderLog, db_text, put_candidate, test_context, test_dir,
};

fn ctx_with_recorder()
-> (arbor_backend::Context, Arc<Mutex<RecorderLog>>) {
    let log = Arc::new(Mutex::new(RecorderLog::default()));
    let mut ctx = test_context(test_dir());
    ctx.plugins
        .register(Box::new(Recorder::new("recorder", log.clone(), None)));
    (ctx, log)
}

#[test]
fn add_list_entry_commits_to_running() {
    let (mut ctx, log) = ctx_with_recorder();
    put_candidate(
        &mut ctx,
        "<interfaces><interface><name>eth0</name><mtu>1500</mtu>\
         </interface></interfaces>",
    );

    let result =
        candidate_commit(&mut ctx, None, Db::Candidate, None).unwrap();
    assert_eq!(result, Validity::Valid);

    // Running now equals the candidate.
    assert_eq!(db_text(&ctx, Db::Running), db_text(&ctx, Db::Candidate));
    assert!(db_text(&ctx, Db::Running).contains("eth0"));
    assert!(!ctx.datastores.modified_get(Db::Candidate));

    // The plugin walked the full phase ladder and saw one added subtree.
    let log = log.lock().unwrap();
    assert_eq!(
        log.phases("recorder"),
        ["begin", "validate", "complete", "commit", "commitdone", "end"]
    );
    let begin = &log.events[0];
    assert_eq!((begin.added, begin.deleted, begin.changed), (1, 0, 0));
}

#[test]
fn second_commit_has_empty_diff() {
    let (mut ctx, log) = ctx_with_recorder();
    put_candidate(
        &mut ctx,
        "<interfaces><interface><name>eth0</name></interface></interfaces>",
    );
    candidate_commit(&mut ctx, None, Db::Candidate, None).unwrap();
    let after_first = db_text(&ctx, Db::Running);

    let result =
        candidate_commit(&mut ctx, None, Db::Candidate, None).unwrap();
    assert_eq!(result, Validity::Valid);
    assert_eq!(db_text(&ctx, Db::Running), after_first);

    let log = log.lock().unwrap();
    let second_begin = log
        .events
        .iter()
        .filter(|event| event.phase == "begin")
        .nth(1)
        .unwrap();
    assert_eq!(
        (second_begin.added, second_begin.deleted, second_begin.changed),
        (0, 0, 0)
    );
}

#[test]
fn duplicate_key_fails_commit_and_leaves_running() {
    let (mut ctx, log) = ctx_with_recorder();
    // A hand-edited candidate bypassing the edit preflight.
    std::fs::write(
        ctx.options.datastore_dir.join("candidate_db"),
        "<config>\
           <interfaces xmlns=\"urn:test:netsys\">\
             <interface><name>eth0</name></interface>\
             <interface><name>eth0</name></interface>\
           </interfaces>\
         </config>",
    )
    .unwrap();
    ctx.datastores.cache_clear(Db::Candidate);

    let before = db_text(&ctx, Db::Running);
    let result =
        candidate_commit(&mut ctx, None, Db::Candidate, None).unwrap();
    match result {
        Validity::Invalid(error) => {
            assert_eq!(error.tag, ErrorTag::InvalidValue);
            assert!(error.path.unwrap().contains("interface"));
        }
        Validity::Valid => panic!("expected duplicate-key failure"),
    }
    assert_eq!(db_text(&ctx, Db::Running), before);

    // The observer was begun, then aborted.
    let log = log.lock().unwrap();
    assert_eq!(log.phases("recorder"), ["begin", "abort"]);
}

#[test]
fn dangling_leafref_fails_validation() {
    let (mut ctx, _log) = ctx_with_recorder();
    put_candidate(&mut ctx, "<default-interface>eth9</default-interface>");

    let result = candidate_validate(&mut ctx, Db::Candidate).unwrap();
    match result {
        Validity::Invalid(error) => {
            assert_eq!(error.tag, ErrorTag::InvalidValue);
            assert!(error.message.unwrap().contains("leafref"));
        }
        Validity::Valid => panic!("expected leafref failure"),
    }
    // Validation never touches running.
    assert!(!db_text(&ctx, Db::Running).contains("default-interface"));
}

#[test]
fn plugin_failing_begin_fences_abort_to_observers() {
    let log = Arc::new(Mutex::new(RecorderLog::default()));
    let mut ctx = test_context(test_dir());
    ctx.plugins
        .register(Box::new(Recorder::new("first", log.clone(), None)));
    ctx.plugins.register(Box::new(Recorder::new(
        "second",
        log.clone(),
        Some(Phase::Begin),
    )));
    ctx.plugins
        .register(Box::new(Recorder::new("third", log.clone(), None)));

    put_candidate(
        &mut ctx,
        "<interfaces><interface><name>eth0</name></interface></interfaces>",
    );
    let result = candidate_commit(&mut ctx, None, Db::Candidate, None);
    assert!(matches!(result, Err(Error::Plugin(..))));

    let log = log.lock().unwrap();
    assert_eq!(log.phases("first"), ["begin", "abort"]);
    assert_eq!(log.phases("second"), ["begin", "abort"]);
    // The third plugin never observed begin, so it is not asked to abort.
    assert!(log.phases("third").is_empty());
}

#[test]
fn commit_failure_is_best_effort_completed() {
    let log = Arc::new(Mutex::new(RecorderLog::default()));
    let mut ctx = test_context(test_dir());
    ctx.plugins.register(Box::new(Recorder::new(
        "flaky",
        log.clone(),
        Some(Phase::Commit),
    )));

    put_candidate(
        &mut ctx,
        "<interfaces><interface><name>eth0</name></interface></interfaces>",
    );
    let result = candidate_commit(&mut ctx, None, Db::Candidate, None);
    // The failure is reported...
    assert!(matches!(result, Err(Error::Plugin(_, Phase::Commit, _))));
    // ...but commit-done and abort were still delivered...
    let phases = log.lock().unwrap().phases("flaky");
    assert_eq!(
        phases,
        ["begin", "validate", "complete", "commit", "commitdone", "abort"]
    );
    // ...and running kept the committed content.
    assert!(db_text(&ctx, Db::Running).contains("eth0"));
}

#[test]
fn candidate_validate_does_not_commit() {
    let (mut ctx, log) = ctx_with_recorder();
    put_candidate(
        &mut ctx,
        "<interfaces><interface><name>eth0</name></interface></interfaces>",
    );
    let result = candidate_validate(&mut ctx, Db::Candidate).unwrap();
    assert_eq!(result, Validity::Valid);
    assert!(!db_text(&ctx, Db::Running).contains("eth0"));

    let log = log.lock().unwrap();
    assert_eq!(
        log.phases("recorder"),
        ["begin", "validate", "complete", "end"]
    );
}

#[test]
fn startup_commit_seeds_running() {
    let (mut ctx, log) = ctx_with_recorder();
    std::fs::write(
        ctx.options.datastore_dir.join("startup_db"),
        "<config>\
           <interfaces xmlns=\"urn:test:netsys\">\
             <interface><name>boot0</name></interface>\
           </interfaces>\
         </config>",
    )
    .unwrap();

    let result = startup_commit(&mut ctx, Db::Startup).unwrap();
    assert_eq!(result, Validity::Valid);
    assert!(db_text(&ctx, Db::Running).contains("boot0"));

    // The startup transition is all-adds.
    let log = log.lock().unwrap();
    let begin = &log.events[0];
    assert_eq!(begin.phase, "begin");
    assert!(begin.added >= 1);
    assert_eq!((begin.deleted, begin.changed), (0, 0));
}

const LEGACY_MODULE: &str = r#"
module legacy {
  namespace "urn:test:legacy";
  prefix lg;

  revision 2023-01-01;

  leaf new-name {
    type string;
  }
}
"#;

const LEGACY_CHANGELOG: &str = r#"
<changelogs xmlns="urn:arbor:changelog" xmlns:lg="urn:test:legacy">
  <changelog>
    <namespace>urn:test:legacy</namespace>
    <revfrom>2020-01-01</revfrom>
    <revision>2023-01-01</revision>
    <step>
      <op>rename</op>
      <where>/lg:old-name</where>
      <tag>'new-name'</tag>
    </step>
  </changelog>
</changelogs>
"#;

#[test]
fn startup_upgrades_via_changelog() {
    let dir = test_dir();
    let mut schema = arbor_yang::SchemaStore::new();
    schema.add_embedded_module("legacy", Some("2023-01-01"), LEGACY_MODULE);
    schema.load_module("legacy", None).unwrap();
    let options = arbor_backend::Options {
        datastore_dir: dir.clone(),
        record_modstate: true,
        ..Default::default()
    };
    let mut ctx = arbor_backend::Context::new(options, schema).unwrap();
    ctx.create_base_datastores().unwrap();
    ctx.changelog =
        Some(Changelog::from_string(LEGACY_CHANGELOG).unwrap());

    // The startup store predates the rename of /old-name to /new-name.
    std::fs::write(
        dir.join("startup_db"),
        "<config>\
           <yang-library xmlns=\"urn:ietf:params:xml:ns:yang:ietf-yang-library\">\
             <module-set><module><name>legacy</name>\
             <revision>2020-01-01</revision></module></module-set>\
           </yang-library>\
           <old-name xmlns=\"urn:test:legacy\">carried</old-name>\
         </config>",
    )
    .unwrap();

    let result = startup_commit(&mut ctx, Db::Startup).unwrap();
    assert_eq!(result, Validity::Valid);
    let running = db_text(&ctx, Db::Running);
    assert!(running.contains("<new-name"));
    assert!(running.contains("carried"));
    assert!(!running.contains("old-name"));
}

#[test]
fn failsafe_recovery_after_bad_startup() {
    let (mut ctx, _log) = ctx_with_recorder();
    // Hand-corrupted startup: element unknown to the schema.
    std::fs::write(
        ctx.options.datastore_dir.join("startup_db"),
        "<config><bogus xmlns=\"urn:test:netsys\">x</bogus></config>",
    )
    .unwrap();
    // Minimal valid failsafe.
    std::fs::write(
        ctx.options.datastore_dir.join("failsafe_db"),
        "<config>\
           <interfaces xmlns=\"urn:test:netsys\">\
             <interface><name>safe0</name></interface>\
           </interfaces>\
         </config>",
    )
    .unwrap();

    let result = startup_commit(&mut ctx, Db::Startup).unwrap();
    assert!(matches!(result, Validity::Invalid(_)));

    load_failsafe(&mut ctx, "startup").unwrap();
    let running = db_text(&ctx, Db::Running);
    assert!(running.contains("safe0"));
    assert_eq!(ctx.datastores.islocked(Db::Running), None);
}

#[test]
fn failsafe_missing_is_fatal() {
    let (mut ctx, _log) = ctx_with_recorder();
    let result = load_failsafe(&mut ctx, "startup");
    assert!(matches!(result, Err(Error::FailsafeMissing(_))));
}

#[test]
fn restart_one_replays_into_a_single_plugin() {
    let log = Arc::new(Mutex::new(RecorderLog::default()));
    let mut ctx = test_context(test_dir());
    ctx.plugins
        .register(Box::new(Recorder::new("kept", log.clone(), None)));
    ctx.plugins
        .register(Box::new(Recorder::new("restarted", log.clone(), None)));

    put_candidate(
        &mut ctx,
        "<interfaces><interface><name>eth0</name></interface></interfaces>",
    );
    candidate_commit(&mut ctx, None, Db::Candidate, None).unwrap();
    log.lock().unwrap().events.clear();

    let result = restart_one(&mut ctx, "restarted").unwrap();
    assert_eq!(result, Validity::Valid);

    let log = log.lock().unwrap();
    assert!(log.phases("kept").is_empty());
    assert_eq!(
        log.phases("restarted"),
        ["begin", "validate", "complete", "commit", "commitdone", "end"]
    );
    // Replaying from an empty tmp store means everything is an add.
    let begin = &log.events[0];
    assert_eq!(begin.added, 1);
}

#[test]
fn unknown_plugin_restart_is_an_error() {
    let (mut ctx, _log) = ctx_with_recorder();
    assert!(matches!(
        restart_one(&mut ctx, "nonesuch"),
        Err(Error::PluginNotFound(_))
    ));
}

#[test]
fn discard_changes_reverts_candidate() {
    let (mut ctx, _log) = ctx_with_recorder();
    put_candidate(
        &mut ctx,
        "<interfaces><interface><name>eth0</name></interface></interfaces>",
    );
    candidate_commit(&mut ctx, None, Db::Candidate, None).unwrap();
    put_candidate(
        &mut ctx,
        "<interfaces><interface><name>eth1</name></interface></interfaces>",
    );
    assert!(ctx.datastores.modified_get(Db::Candidate));

    discard_changes(&mut ctx).unwrap();
    assert!(!ctx.datastores.modified_get(Db::Candidate));
    assert!(!db_text(&ctx, Db::Candidate).contains("eth1"));
    assert_eq!(db_text(&ctx, Db::Candidate), db_text(&ctx, Db::Running));
}

#[test]
fn no_transient_flags_survive_a_commit() {
    let (mut ctx, _log) = ctx_with_recorder();
    put_candidate(
        &mut ctx,
        "<interfaces><interface><name>eth0</name></interface></interfaces>",
    );
    candidate_commit(&mut ctx, None, Db::Candidate, None).unwrap();

    for db in [Db::Running, Db::Candidate] {
        let snapshot = ctx
            .datastores
            .get(db, &ctx.schema, BindMode::Module, None)
            .unwrap();
        assert!(
            !snapshot.tree.any_flag(
                XmlFlags::ADD
                    | XmlFlags::DEL
                    | XmlFlags::CHANGE
                    | XmlFlags::MARK
            ),
            "transient flags leaked into {db}"
        );
    }
}
