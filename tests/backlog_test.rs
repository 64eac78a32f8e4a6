//! Backlog parsing.

use workq::backlog::{parse, parse_file};
use workq::error::Error;
use workq::model::SkipReason;

const BACKLOG: &str = "\
# Work items

Intro prose that is not an item.

## Current items
Some prose between items.
1. Wire up parser [zsc]
2. Needs design [zsc] **no-auto-start**

3. Fix bug [zsc] **no-auto-start**
4a. Docs pass [ops]
5. Refactor store [ZSC] Blocked-By: 4a
6. Polish UI [zsc] **no-auto-merge**
7. Untagged thing
- bullet that is not an item

## Done
8. Old item [zsc]
";

#[test]
fn parses_no_auto_start_line() {
    let items = parse("## Current items\n3. Fix bug [zsc] **no-auto-start**\n", "zsc").unwrap();
    assert_eq!(items.len(), 1);

    let item = &items[0];
    assert_eq!(item.item_id, "3");
    assert_eq!(item.queue_tag.as_deref(), Some("zsc"));
    assert!(item.no_auto_start);
    assert!(!item.eligible);
    assert_eq!(item.skip_reasons, vec![SkipReason::NoAutoStart]);
    assert_eq!(item.line_number, 2);
    assert_eq!(item.work_line, "3. Fix bug [zsc] **no-auto-start**");
}

#[test]
fn items_stop_at_done_section_and_prose_is_skipped() {
    let items = parse(BACKLOG, "zsc").unwrap();
    let ids: Vec<_> = items.iter().map(|it| it.item_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3", "4a", "5", "6", "7"]);
}

#[test]
fn line_numbers_are_one_based_document_positions() {
    let items = parse(BACKLOG, "zsc").unwrap();
    assert_eq!(items[0].line_number, 7);
    assert_eq!(items[2].line_number, 10);
}

#[test]
fn eligibility_and_skip_reasons() {
    let items = parse(BACKLOG, "zsc").unwrap();
    let by_id = |id: &str| items.iter().find(|it| it.item_id == id).unwrap();

    assert!(by_id("1").eligible);
    assert!(by_id("1").skip_reasons.is_empty());

    let docs = by_id("4a");
    assert_eq!(docs.queue_tag.as_deref(), Some("ops"));
    assert_eq!(docs.skip_reasons, vec![SkipReason::NotInQueue]);

    let blocked = by_id("5");
    assert_eq!(blocked.queue_tag.as_deref(), Some("zsc"));
    assert!(blocked.blocked_by);
    assert_eq!(blocked.skip_reasons, vec![SkipReason::BlockedBy]);

    let untagged = by_id("7");
    assert_eq!(untagged.queue_tag, None);
    assert!(!untagged.eligible);
}

#[test]
fn no_auto_merge_does_not_affect_eligibility() {
    let items = parse(BACKLOG, "zsc").unwrap();
    let polish = items.iter().find(|it| it.item_id == "6").unwrap();
    assert!(polish.no_auto_merge);
    assert!(polish.eligible);
}

#[test]
fn eligible_queue_is_a_parameter() {
    let items = parse(BACKLOG, "OPS").unwrap();
    let eligible: Vec<_> = items
        .iter()
        .filter(|it| it.eligible)
        .map(|it| it.item_id.as_str())
        .collect();
    assert_eq!(eligible, vec!["4a"]);
}

#[test]
fn header_match_is_case_insensitive_and_handles_crlf() {
    let doc = "## CURRENT ITEMS  \r\n10b. Thing [Zsc]\r\n## done\r\n11. Later [zsc]\r\n";
    let items = parse(doc, "zsc").unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].item_id, "10b");
    assert_eq!(items[0].queue_tag.as_deref(), Some("zsc"));
    assert!(items[0].eligible);
}

#[test]
fn first_bracketed_tag_wins() {
    let items = parse("## Current items\n1. Thing [ops] then [zsc]\n", "zsc").unwrap();
    assert_eq!(items[0].queue_tag.as_deref(), Some("ops"));
    assert!(!items[0].eligible);
}

#[test]
fn missing_section_is_an_error() {
    let err = parse("# Backlog\n1. Thing [zsc]\n", "zsc").unwrap_err();
    assert!(matches!(err, Error::SectionNotFound { .. }), "got {err:?}");
    assert_eq!(err.code(), "E_BACKLOG_SECTION");
}

#[tokio::test]
async fn parse_file_reports_the_file_on_missing_section() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("BACKLOG.md");
    std::fs::write(&path, "nothing here\n").unwrap();

    let err = parse_file(&path, "zsc").await.unwrap_err();
    match err {
        Error::SectionNotFound { backlog_file } => assert_eq!(backlog_file, Some(path)),
        other => panic!("expected SectionNotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn parse_file_returns_absolute_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("BACKLOG.md");
    std::fs::write(&path, BACKLOG).unwrap();

    let parsed = parse_file(&path, "zsc").await.unwrap();
    assert!(parsed.file.is_absolute());
    assert_eq!(parsed.items.len(), 7);
}
