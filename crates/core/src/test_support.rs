//! Small in-memory PDF builders for unit tests.

/// Serialize `bodies` as objects `1..=n` with a classic xref table.
/// Object 1 is the catalog.
pub fn build_pdf(bodies: &[&str]) -> Vec<u8> {
    build_pdf_with_trailer(bodies, "")
}

/// Like [`build_pdf`], with `extra` appended inside the trailer dictionary.
pub fn build_pdf_with_trailer(bodies: &[&str], extra: &str) -> Vec<u8> {
    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in bodies.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
    }
    let xref = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", bodies.len() + 1).as_bytes());
    for off in offsets {
        out.extend_from_slice(format!("{off:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R {extra}>>\nstartxref\n{xref}\n%%EOF\n",
            bodies.len() + 1
        )
        .as_bytes(),
    );
    out
}

/// A stream object body with a correct `/Length`.
pub fn stream_body(dict_extra: &str, data: &str) -> String {
    format!(
        "<< /Length {} {dict_extra}>>\nstream\n{data}\nendstream",
        data.len()
    )
}
