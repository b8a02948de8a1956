//! Property-based tests for pdfdesk-api
//!
//! Tests upload validation, expiry and output naming using proptest.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use uuid::Uuid;

use pdfdesk_api::files::{
    infer_mime_type, validate_upload, TemporaryFile, ALLOWED_EXTENSIONS, MAX_UPLOAD_BYTES,
};
use pdfdesk_api::transform::output_filename;

// ============================================================
// Strategies
// ============================================================

fn allowed_extension() -> impl Strategy<Value = &'static str> {
    prop::sample::select(ALLOWED_EXTENSIONS.to_vec())
}

/// Extensions outside the allow-list
fn rejected_extension() -> impl Strategy<Value = String> {
    "\\.[a-z]{2,5}".prop_filter("Must not be allowed", |ext| {
        !ALLOWED_EXTENSIONS.contains(&ext.as_str())
    })
}

fn stored_file(lifetime_minutes: i64) -> TemporaryFile {
    let uploaded_at = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
    TemporaryFile {
        id: Uuid::new_v4(),
        original_filename: "a.pdf".into(),
        file_path: "uploads/2024/06/01/a.pdf".into(),
        file_size: 10,
        mime_type: "application/pdf".into(),
        uploaded_at,
        expires_at: uploaded_at + Duration::minutes(lifetime_minutes),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // ============================================================
    // Upload validation
    // ============================================================

    #[test]
    fn octet_stream_with_allowed_extension_is_accepted(
        stem in "[A-Za-z0-9_]{1,20}",
        ext in allowed_extension(),
        size in 1usize..=MAX_UPLOAD_BYTES,
    ) {
        let filename = format!("{}{}", stem, ext.to_uppercase());
        prop_assert!(validate_upload(&filename, Some("application/octet-stream"), size).is_ok());
        prop_assert!(validate_upload(&filename, None, size).is_ok());
    }

    #[test]
    fn octet_stream_with_other_extension_is_rejected(
        stem in "[A-Za-z0-9_]{1,20}",
        ext in rejected_extension(),
    ) {
        let filename = format!("{}{}", stem, ext);
        prop_assert!(validate_upload(&filename, Some("application/octet-stream"), 100).is_err());
    }

    #[test]
    fn oversized_uploads_are_rejected(extra in 1usize..1024) {
        prop_assert!(validate_upload("a.pdf", Some("application/pdf"), MAX_UPLOAD_BYTES + extra).is_err());
    }

    #[test]
    fn allowed_extensions_infer_a_specific_type(ext in allowed_extension()) {
        let mime = infer_mime_type(&format!("file{}", ext));
        prop_assert_ne!(mime, "application/octet-stream");
    }

    // ============================================================
    // Expiry
    // ============================================================

    #[test]
    fn expiry_is_strictly_after_deadline(
        lifetime in 0i64..240,
        offset in -600i64..600,
    ) {
        let file = stored_file(lifetime);
        let now = file.expires_at + Duration::seconds(offset);
        prop_assert_eq!(file.is_expired_at(now), offset > 0);
    }

    // ============================================================
    // Output naming
    // ============================================================

    #[test]
    fn output_names_are_bare_and_keep_extension(
        dirs in prop::collection::vec("[a-z.]{1,8}", 0..4),
        name in "[A-Za-z0-9_ -]{1,20}",
    ) {
        let requested = format!("{}/{}", dirs.join("/"), name);
        let out = output_filename(Some(&requested), "merged_document.pdf", "pdf");
        prop_assert!(!out.contains('/'));
        prop_assert!(out.to_ascii_lowercase().ends_with(".pdf"));
    }
}
