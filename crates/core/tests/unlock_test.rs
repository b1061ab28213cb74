//! End-to-end unlocking of generated documents.

mod common;

use common::{
    Cipher, Encryption, Obj, P_LOCKED, PdfBuilder, Reopened, break_xref, cyclic_doc,
    incremental_update, page_content, pages_doc,
};
use deadbolt_core::document::PasswordKind;
use deadbolt_core::model::PDFObject;
use deadbolt_core::{
    ErrorKind, Strategy, UnlockOptions, UnlockStatus, Unlocked, Unlocker, unlock,
};

fn structural(data: Vec<u8>) -> Unlocked {
    Unlocker::new()
        .strategy(Strategy::Structural)
        .unlock(data)
        .unwrap()
}

fn contents(n: usize) -> Vec<Vec<u8>> {
    (0..n).map(|i| page_content(i).into_bytes()).collect()
}

fn info_title(doc: &Reopened) -> Vec<u8> {
    let info = doc.raw.trailer().get("Info").expect("output keeps /Info");
    match doc.raw.resolve(info).unwrap() {
        PDFObject::Dict(dict) => dict["Title"].as_string().unwrap().to_vec(),
        other => panic!("unexpected /Info {other:?}"),
    }
}

#[test]
fn plain_document_round_trips() {
    let unlocked = structural(pages_doc(3).build());
    assert_eq!(unlocked.status, UnlockStatus::Structural);
    assert_eq!(unlocked.report.encryption, "not_encrypted");
    assert_eq!(unlocked.report.page_count, 3);
    assert!(!unlocked.report.repaired);

    let out = Reopened::new(&unlocked.bytes);
    assert!(!out.state.is_encrypted());
    assert_eq!(out.page_contents(), contents(3));
    assert_eq!(info_title(&out), b"Quarterly report");
}

#[test]
fn restrictions_are_removed_for_every_cipher() {
    for cipher in [Cipher::Rc4_40, Cipher::Rc4_128, Cipher::Aes128] {
        let data = pages_doc(2)
            .encrypt(Encryption::restrictions(cipher, P_LOCKED))
            .build();
        let unlocked = unlock(data, &UnlockOptions::default()).unwrap();
        assert_eq!(unlocked.status, UnlockStatus::Structural, "{cipher:?}");
        assert_eq!(unlocked.report.encryption, "restrictions_only");
        assert_eq!(
            unlocked.report.permissions_removed,
            ["print", "modify", "copy", "annotate"]
        );
        assert_eq!(unlocked.report.authenticated_as, Some(PasswordKind::User));

        let text = String::from_utf8_lossy(&unlocked.bytes);
        assert!(!text.contains("/Encrypt"), "{cipher:?}");

        let out = Reopened::new(&unlocked.bytes);
        assert_eq!(out.state.as_str(), "not_encrypted");
        assert_eq!(out.page_contents(), contents(2), "{cipher:?}");
        assert_eq!(info_title(&out), b"Quarterly report", "{cipher:?}");
    }
}

#[test]
fn open_password_is_required_and_checked() {
    let data = pages_doc(2)
        .encrypt(Encryption::new(Cipher::Rc4_128, "secret", "owner"))
        .build();

    let err = Unlocker::new().unlock(data.clone()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PasswordRequired);
    assert!(err.is_password_related());

    let err = Unlocker::new().password("wrong").unlock(data.clone()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IncorrectPassword);

    let unlocked = Unlocker::new().password("secret").unlock(data.clone()).unwrap();
    assert_eq!(unlocked.report.encryption, "requires_key");
    assert_eq!(unlocked.report.page_count, 2);
    assert_eq!(unlocked.report.authenticated_as, Some(PasswordKind::User));
    assert_eq!(Reopened::new(&unlocked.bytes).page_contents(), contents(2));

    let unlocked = Unlocker::new().password("owner").unlock(data).unwrap();
    assert_eq!(unlocked.report.authenticated_as, Some(PasswordKind::Owner));
}

#[test]
fn aes_document_with_object_stream() {
    // Catalog, page tree and both pages live in an encrypted object stream.
    let data = pages_doc(2)
        .encrypt(Encryption::new(Cipher::Aes128, "pw", "owner"))
        .pack(&[1, 2, 3, 4])
        .build();
    let unlocked = Unlocker::new()
        .password("pw")
        .strategy(Strategy::Structural)
        .unlock(data)
        .unwrap();
    assert_eq!(unlocked.report.revision, Some(4));

    let out = Reopened::new(&unlocked.bytes);
    assert_eq!(out.page_contents(), contents(2));
    assert_eq!(info_title(&out), b"Quarterly report");
}

#[test]
fn unlocked_output_is_a_fixed_point() {
    let data = pages_doc(3)
        .encrypt(Encryption::restrictions(Cipher::Rc4_128, P_LOCKED))
        .build();
    let once = structural(data);
    let twice = structural(once.bytes.clone());
    assert_eq!(twice.report.encryption, "not_encrypted");
    assert_eq!(once.bytes, twice.bytes);
}

#[test]
fn cyclic_page_tree_is_reported() {
    let err = unlock(cyclic_doc(), &UnlockOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CyclicPageTree);
}

#[test]
fn print_and_copy_restrictions_on_five_pages() {
    // Only print (bit 3) and copy (bit 5) withheld.
    let data = pages_doc(5)
        .encrypt(Encryption::restrictions(Cipher::Rc4_128, -24))
        .build();
    let unlocked = unlock(data, &UnlockOptions::default()).unwrap();
    assert_eq!(unlocked.status, UnlockStatus::Structural);
    assert_eq!(unlocked.report.page_count, 5);
    assert_eq!(unlocked.report.permissions_removed, ["print", "copy"]);
    assert_eq!(Reopened::new(&unlocked.bytes).page_contents(), contents(5));
}

#[test]
fn incremental_update_wins() {
    let base = pages_doc(2).build();
    // Swap the page order in an appended revision.
    let updated = incremental_update(
        &base,
        &[(2, "<< /Type /Pages /Kids [4 0 R 3 0 R] /Count 2 /MediaBox [0 0 200 100] >>")],
    );
    let unlocked = structural(updated);
    assert!(!unlocked.report.repaired);
    let mut expected = contents(2);
    expected.reverse();
    assert_eq!(Reopened::new(&unlocked.bytes).page_contents(), expected);
}

#[test]
fn xref_stream_documents_are_read() {
    let unlocked = structural(pages_doc(2).xref_stream().build());
    assert_eq!(Reopened::new(&unlocked.bytes).page_contents(), contents(2));
}

#[test]
fn damaged_xref_is_rebuilt_by_scanning() {
    let data = pages_doc(3)
        .encrypt(Encryption::restrictions(Cipher::Rc4_40, P_LOCKED))
        .build();
    let unlocked = structural(break_xref(&data));
    assert!(unlocked.report.repaired);
    assert_eq!(unlocked.report.encryption, "restrictions_only");

    let out = Reopened::new(&unlocked.bytes);
    assert!(!out.raw.is_fallback());
    assert_eq!(out.page_contents(), contents(3));
}

#[test]
fn unreadable_catalog_entry_falls_back_to_raster() {
    // Object 9 has no body, so copying /Outlines fails.
    let data = pages_doc(2)
        .text(1, "<< /Type /Catalog /Pages 2 0 R /Outlines 9 0 R >>")
        .object(9, Obj::text(""))
        .build();

    let err = Unlocker::new()
        .strategy(Strategy::Structural)
        .unlock(data.clone())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnreadableContainer);

    let unlocked = Unlocker::new()
        .rasterize_fallback(true)
        .scale(0.5)
        .threads(2)
        .unlock(data.clone())
        .unwrap();
    assert_eq!(unlocked.status, UnlockStatus::Rasterized);
    assert_eq!(unlocked.report.page_count, 2);

    // Leaving the catalog behind avoids the broken object altogether.
    let unlocked = Unlocker::new()
        .strategy(Strategy::Structural)
        .carry_catalog(false)
        .unlock(data)
        .unwrap();
    assert_eq!(unlocked.status, UnlockStatus::Structural);
}

#[test]
fn info_can_be_dropped() {
    let unlocked = Unlocker::new()
        .carry_info(false)
        .unlock(pages_doc(1).build())
        .unwrap();
    let out = Reopened::new(&unlocked.bytes);
    assert!(out.raw.trailer().get("Info").is_none());
    assert_eq!(out.page_count(), 1);
}

#[test]
fn encrypted_strings_in_pages_are_decrypted() {
    let data = PdfBuilder::new()
        .text(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .text(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .object(
            3,
            Obj::with_string("<< /Type /Page /Parent 2 0 R /PieceInfo << /Note $S >> >>", b"hello"),
        )
        .encrypt(Encryption::new(Cipher::Aes128, "", "owner"))
        .build();
    let unlocked = structural(data);
    let out = Reopened::new(&unlocked.bytes);
    let page = out.raw.get_raw(3).unwrap().unwrap();
    let note = page.as_dict().unwrap()["PieceInfo"].as_dict().unwrap()["Note"].clone();
    assert_eq!(note.as_string().unwrap(), b"hello");
}

#[test]
fn hostile_object_stream_does_not_stop_a_repair() {
    let data = PdfBuilder::new()
        .text(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .text(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .text(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 10 10] >>")
        .object(4, Obj::stream("/Type /ObjStm /N 1000000000000000000 /First 0", b""))
        .build();
    let unlocked = structural(break_xref(&data));
    assert!(unlocked.report.repaired);
    assert_eq!(unlocked.report.page_count, 1);
}

#[test]
fn small_reals_survive_the_rebuild() {
    let data = PdfBuilder::new()
        .text(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .text(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .text(
            3,
            "<< /Type /Page /Parent 2 0 R /PieceInfo << /Matrix [0.00048828125 0 0 0.00048828125 0.0000001 0] >> >>",
        )
        .build();
    let out = Reopened::new(&structural(data).bytes);
    let page = out.raw.get_raw(3).unwrap().unwrap();
    let matrix = page.as_dict().unwrap()["PieceInfo"].as_dict().unwrap()["Matrix"]
        .as_array()
        .unwrap()
        .clone();
    assert_eq!(matrix[0], PDFObject::Real(0.000_488_281_25));
    assert_eq!(matrix[4], PDFObject::Real(1e-7));
}
