//! Mention extraction from message text and marked spans.
//!
//! Pure: no I/O, no state. One record per recognized span, in span order,
//! without deduplication; a message naming the same person twice yields two
//! records and the store counts both.

use tagboard_ipc::{AccountRef, Span, SpanKind};
use tagboard_storage::IdentityHint;

pub const UNKNOWN_DISPLAY: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionRecord {
    pub hint: IdentityHint,
    pub display: String,
}

pub fn extract(text: &str, spans: &[Span]) -> Vec<MentionRecord> {
    let mut records = Vec::new();

    for span in spans {
        match &span.kind {
            SpanKind::BareHandle => {
                let Some(raw) = slice_span(text, span) else {
                    continue;
                };
                let handle = raw.trim_start_matches('@');
                if handle.is_empty() {
                    continue;
                }
                records.push(MentionRecord {
                    hint: IdentityHint::Handle(handle.to_string()),
                    display: format!("@{}", handle),
                });
            }
            SpanKind::ResolvedAccount { account } => {
                // Without an account there is no identity to count under.
                let Some(account) = account else {
                    continue;
                };
                records.push(MentionRecord {
                    hint: IdentityHint::Account {
                        id: account.id,
                        username: account.username.clone(),
                    },
                    display: display_name(Some(account)),
                });
            }
        }
    }

    records
}

/// Human-readable rendering for a resolved account: `@username` when one
/// exists, else first/last name, else the numeric id as text.
pub fn display_name(account: Option<&AccountRef>) -> String {
    let Some(account) = account else {
        return UNKNOWN_DISPLAY.to_string();
    };

    if let Some(username) = account.username.as_deref().filter(|u| !u.is_empty()) {
        return format!("@{}", username);
    }

    let mut name = account.first_name.trim().to_string();
    if let Some(last) = account.last_name.as_deref() {
        name = format!("{} {}", name, last).trim().to_string();
    }

    if name.is_empty() {
        account.id.to_string()
    } else {
        name
    }
}

/// Byte-slice a span out of the text. Zero-length, out-of-bounds, and
/// non-char-boundary spans yield None instead of panicking.
fn slice_span<'a>(text: &'a str, span: &Span) -> Option<&'a str> {
    if span.length == 0 {
        return None;
    }
    let end = span.offset.checked_add(span.length)?;
    text.get(span.offset..end)
}

#[cfg(test)]
mod tests {
    use super::{display_name, extract, MentionRecord, UNKNOWN_DISPLAY};
    use tagboard_ipc::{AccountRef, Span, SpanKind};
    use tagboard_storage::IdentityHint;

    fn bare(offset: usize, length: usize) -> Span {
        Span {
            offset,
            length,
            kind: SpanKind::BareHandle,
        }
    }

    fn resolved(account: Option<AccountRef>) -> Span {
        Span {
            offset: 0,
            length: 0,
            kind: SpanKind::ResolvedAccount { account },
        }
    }

    fn account(id: i64, username: Option<&str>, first: &str, last: Option<&str>) -> AccountRef {
        AccountRef {
            id,
            username: username.map(str::to_string),
            first_name: first.to_string(),
            last_name: last.map(str::to_string),
        }
    }

    #[test]
    fn bare_handle_strips_at_and_keeps_casing_in_display() {
        let text = "hello @Alice";
        let records = extract(text, &[bare(6, 6)]);
        assert_eq!(
            records,
            vec![MentionRecord {
                hint: IdentityHint::Handle("Alice".to_string()),
                display: "@Alice".to_string(),
            }]
        );
    }

    #[test]
    fn records_preserve_span_order_without_dedup() {
        let text = "ping @bob and @bob again";
        let records = extract(text, &[bare(5, 4), bare(14, 4)]);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], records[1]);
    }

    #[test]
    fn empty_handle_span_is_discarded() {
        let text = "just an @ sign";
        let records = extract(text, &[bare(8, 1)]);
        assert!(records.is_empty());
    }

    #[test]
    fn out_of_bounds_and_zero_length_spans_are_skipped() {
        let text = "short";
        let records = extract(text, &[bare(3, 100), bare(999, 4), bare(0, 0)]);
        assert!(records.is_empty());
    }

    #[test]
    fn span_cutting_a_char_boundary_is_skipped() {
        let text = "hi 😀 @bob";
        // starts inside the emoji's UTF-8 encoding
        let records = extract(text, &[bare(4, 3)]);
        assert!(records.is_empty());
    }

    #[test]
    fn resolved_account_does_not_rederive_from_text() {
        let text = "irrelevant";
        let acc = account(42, Some("bob"), "Bob", None);
        let records = extract(text, &[resolved(Some(acc))]);
        assert_eq!(
            records,
            vec![MentionRecord {
                hint: IdentityHint::Account {
                    id: 42,
                    username: Some("bob".to_string()),
                },
                display: "@bob".to_string(),
            }]
        );
    }

    #[test]
    fn resolved_span_without_account_is_skipped() {
        let records = extract("x", &[resolved(None)]);
        assert!(records.is_empty());
    }

    #[test]
    fn mixed_spans_keep_relative_order() {
        let text = "hey @ana";
        let acc = account(7, None, "Zed", None);
        let records = extract(text, &[resolved(Some(acc)), bare(4, 4)]);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].display, "Zed");
        assert_eq!(records[1].display, "@ana");
    }

    #[test]
    fn display_prefers_username() {
        let acc = account(1, Some("neo"), "Thomas", Some("Anderson"));
        assert_eq!(display_name(Some(&acc)), "@neo");
    }

    #[test]
    fn display_joins_first_and_last_name_trimmed() {
        let acc = account(1, None, "  Thomas ", Some("Anderson"));
        assert_eq!(display_name(Some(&acc)), "Thomas Anderson");

        let first_only = account(1, None, "Trinity", None);
        assert_eq!(display_name(Some(&first_only)), "Trinity");
    }

    #[test]
    fn display_falls_back_to_numeric_id() {
        let acc = account(777, None, "", None);
        assert_eq!(display_name(Some(&acc)), "777");
    }

    #[test]
    fn display_for_missing_account_is_placeholder() {
        assert_eq!(display_name(None), UNKNOWN_DISPLAY);
    }
}
