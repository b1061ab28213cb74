mod common;

use common::{Cipher, Encryption, P_LOCKED, break_xref, pages_doc};
use deadbolt_core::{ErrorKind, inspect};

#[test]
fn plain_document() {
    let inspection = inspect(pages_doc(4).build(), None).unwrap();
    assert_eq!(inspection.version, "1.6");
    assert_eq!(inspection.encryption, "not_encrypted");
    assert_eq!(inspection.revision, None);
    assert!(inspection.restrictions.is_empty());
    assert!(!inspection.password_required);
    assert_eq!(inspection.page_count, Some(4));
    // Catalog, tree, 4 pages, 4 content streams, info
    assert_eq!(inspection.object_count, 11);
}

#[test]
fn restricted_document_lists_restrictions() {
    let data = pages_doc(1)
        .encrypt(Encryption::restrictions(Cipher::Rc4_40, P_LOCKED))
        .build();
    let inspection = inspect(data, None).unwrap();
    assert_eq!(inspection.encryption, "restrictions_only");
    assert_eq!(inspection.revision, Some(2));
    assert_eq!(inspection.key_length_bits, Some(40));
    assert_eq!(inspection.restrictions, ["print", "modify", "copy", "annotate"]);
    assert_eq!(inspection.page_count, Some(1));
}

#[test]
fn locked_document_is_reported_not_rejected() {
    let data = pages_doc(2)
        .encrypt(Encryption::new(Cipher::Aes128, "secret", "owner"))
        .build();

    let inspection = inspect(data.clone(), None).unwrap();
    assert_eq!(inspection.encryption, "requires_key");
    assert!(inspection.password_required);
    assert_eq!(inspection.page_count, None);
    assert_eq!(inspection.key_length_bits, Some(128));

    let inspection = inspect(data.clone(), Some("secret")).unwrap();
    assert!(!inspection.password_required);
    assert_eq!(inspection.page_count, Some(2));

    let err = inspect(data, Some("nope")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IncorrectPassword);
}

#[test]
fn scanned_index_is_flagged() {
    let inspection = inspect(break_xref(&pages_doc(2).build()), None).unwrap();
    assert!(inspection.repaired);
    assert_eq!(inspection.page_count, Some(2));
}

#[test]
fn garbage_is_unreadable() {
    let err = inspect(b"GIF89a not a pdf".to_vec(), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnreadableContainer);
}
