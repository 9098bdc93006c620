#![allow(dead_code)]

use std::io::Write as _;

use flate2::{write::GzEncoder, Compression};
use sha2::{Digest, Sha256};

pub fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// One regular file whose name is stored verbatim.
pub fn malicious_tarball(path: &str) -> Vec<u8> {
    raw_tarball(&[(path, b'0', "", "evil")])
}

/// Members as `(name, typeflag, link target, contents)`, written as raw
/// ustar headers so names and link targets are stored verbatim.
pub fn raw_tarball(members: &[(&str, u8, &str, &str)]) -> Vec<u8> {
    let mut tar = Vec::new();
    for &(name, typeflag, link, contents) in members {
        let mut header = [0u8; 512];
        header[..name.len()].copy_from_slice(name.as_bytes());
        header[100..108].copy_from_slice(b"0000644\0");
        header[124..136].copy_from_slice(format!("{:011o}\0", contents.len()).as_bytes());
        header[156] = typeflag;
        header[157..157 + link.len()].copy_from_slice(link.as_bytes());
        header[148..156].copy_from_slice(b"        ");
        let cksum: u32 = header.iter().map(|&b| u32::from(b)).sum();
        header[148..156].copy_from_slice(format!("{cksum:06o}\0 ").as_bytes());

        tar.extend_from_slice(&header);
        tar.extend_from_slice(contents.as_bytes());
        tar.extend(std::iter::repeat_n(0u8, (512 - contents.len() % 512) % 512));
    }
    tar.extend(std::iter::repeat_n(0u8, 1024));

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap()
}

pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// `sha256:` followed by 32 lowercase hex characters.
pub fn assert_integrity_format(integrity: &str) {
    let hex = integrity
        .strip_prefix("sha256:")
        .unwrap_or_else(|| panic!("missing prefix: {integrity}"));
    assert_eq!(hex.len(), 32, "{integrity}");
    assert!(
        hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)),
        "{integrity}"
    );
}
