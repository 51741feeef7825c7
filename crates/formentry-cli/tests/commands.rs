//! Command tests against a store laid out in a temporary directory.

use std::fs;
use std::path::{Path, PathBuf};

use formentry_cli::commands::{
    open_workspace, run_enqueue, run_errors, run_process, run_queue, run_status, run_transform,
};
use formentry_core::QueueStatus;
use tempfile::TempDir;

const XSLT: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:output method="text"/>
  <xsl:template match="/form">MSH|^~\&amp;|FORMENTRY|<xsl:value-of select="header/uid"/>&#13;PID|||<xsl:value-of select="patient/id"/></xsl:template>
</xsl:stylesheet>"#;

struct Site {
    dir: TempDir,
    config: PathBuf,
}

impl Site {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir_all(data.join("forms")).unwrap();
        fs::write(data.join("forms").join("adult-return.xsl"), XSLT).unwrap();
        fs::write(
            data.join("forms.toml"),
            "[[form]]\nid = 12\nuuid = \"uuid-12\"\nname = \"Adult Return\"\nxslt = \"forms/adult-return.xsl\"\n",
        )
        .unwrap();
        let config = dir.path().join("formentry.toml");
        fs::write(&config, "store_dir = \"data\"\n").unwrap();
        Self { dir, config }
    }

    fn payload(&self, name: &str, xml: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, xml).unwrap();
        path
    }

    fn config(&self) -> Option<&Path> {
        Some(self.config.as_path())
    }
}

#[test]
fn test_enqueue_process_and_status() {
    let site = Site::new();
    let good = site.payload(
        "good.xml",
        r#"<form id="12"><header><uid>abc</uid></header><patient><id>42</id></patient></form>"#,
    );
    let unknown = site.payload("unknown.xml", r#"<form id="999999"/>"#);
    let workspace = open_workspace(site.config()).unwrap();

    let queued = run_enqueue(&workspace, &[good, unknown]).unwrap();
    assert_eq!(queued.len(), 2);
    assert!(queued[0].id < queued[1].id);
    assert_eq!(
        run_status(&workspace).unwrap(),
        QueueStatus {
            queued: 2,
            archived: 0,
            errored: 0,
        }
    );

    let result = run_process(&workspace).unwrap();
    assert!(!result.skipped);
    assert!(!result.has_failure());
    assert_eq!((result.archived, result.errored), (1, 1));
    assert_eq!(
        result.status,
        QueueStatus {
            queued: 0,
            archived: 1,
            errored: 1,
        }
    );

    let messages = workspace.store.inbound.list().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message.source_key, "abc");
    assert_eq!(messages[0].message.payload, "MSH|^~\\&|FORMENTRY|abc\rPID|||42");
}

#[test]
fn test_process_empty_queue_reports_nothing() {
    let site = Site::new();
    let workspace = open_workspace(site.config()).unwrap();
    let result = run_process(&workspace).unwrap();
    assert!(!result.skipped);
    assert_eq!((result.archived, result.errored), (0, 0));
    assert_eq!(result.status, QueueStatus::default());
}

#[test]
fn test_errors_are_listed_newest_first() {
    let site = Site::new();
    let files = [
        site.payload("a.xml", r#"<form id="500"/>"#),
        site.payload("b.xml", r#"<form id="501"/>"#),
        site.payload("c.xml", "not xml"),
    ];
    let workspace = open_workspace(site.config()).unwrap();
    run_enqueue(&workspace, &files).unwrap();
    run_process(&workspace).unwrap();

    let summaries: Vec<String> = run_errors(&workspace, None)
        .unwrap()
        .into_iter()
        .map(|entry| entry.error_summary)
        .collect();
    insta::assert_debug_snapshot!(summaries, @r#"
    [
        "Error retrieving form ID from data",
        "form id 501 does not exist",
        "form id 500 does not exist",
    ]
    "#);

    let limited = run_errors(&workspace, Some(1)).unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].queue_entry_id.get(), 3);
}

#[test]
fn test_queue_lists_pending_entries_oldest_first() {
    let site = Site::new();
    let files = [
        site.payload("a.xml", r#"<form id="12"/>"#),
        site.payload("b.xml", r#"<form id="12"><header/></form>"#),
        site.payload("c.xml", "<x/>"),
    ];
    let workspace = open_workspace(site.config()).unwrap();
    let queued = run_enqueue(&workspace, &files).unwrap();

    let listed = run_queue(&workspace, None).unwrap();
    assert_eq!(listed, queued);
    let sizes: Vec<usize> = listed.iter().map(|entry| entry.payload.len()).collect();
    assert_eq!(sizes, vec![15, 30, 4]);

    let limited = run_queue(&workspace, Some(2)).unwrap();
    assert_eq!(limited, queued[..2].to_vec());

    run_process(&workspace).unwrap();
    assert!(run_queue(&workspace, None).unwrap().is_empty());
}

#[test]
fn test_state_survives_reopening_the_workspace() {
    let site = Site::new();
    let file = site.payload(
        "good.xml",
        r#"<form id="12"><header><uid>abc</uid></header></form>"#,
    );
    {
        let workspace = open_workspace(site.config()).unwrap();
        run_enqueue(&workspace, std::slice::from_ref(&file)).unwrap();
        run_process(&workspace).unwrap();
    }

    let workspace = open_workspace(site.config()).unwrap();
    run_enqueue(&workspace, &[file]).unwrap();
    let result = run_process(&workspace).unwrap();
    assert_eq!(result.archived, 1);
    assert_eq!(result.status.archived, 2);
    assert_eq!(workspace.store.inbound.list().unwrap().len(), 1);
}

#[test]
fn test_transform_outside_the_queue() {
    let site = Site::new();
    let input = site.payload(
        "good.xml",
        r#"<form id="12"><header><uid>u-1</uid></header><patient><id>7</id></patient></form>"#,
    );
    let xslt = site.dir.path().join("data/forms/adult-return.xsl");
    let output = run_transform(&xslt, &input).unwrap();
    assert_eq!(output, "MSH|^~\\&|FORMENTRY|u-1\rPID|||7");
}

#[test]
fn test_transform_reports_stylesheet_errors() {
    let site = Site::new();
    let input = site.payload("good.xml", r#"<form id="12"/>"#);
    let xslt = site.payload("broken.xsl", "<xsl:stylesheet");
    let error = run_transform(&xslt, &input).unwrap_err();
    assert!(format!("{error:#}").starts_with("transform "));
}

#[test]
fn test_missing_explicit_config_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    let error = open_workspace(Some(&missing)).err().unwrap();
    assert!(format!("{error:#}").contains("absent.toml"));
}
