// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use super::*;

const ED25519_LINE: &str = "example.com ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIIaVnu0OSV5sdSTonBPvoRFdHUKgkWeTWqBIZAHqRqsv";

#[test]
fn test_parse_known_hosts() {
    let content = format!(
        "# comment line\n\n{ED25519_LINE} optional-comment\nmalformed-line\n"
    );
    let keys = parse_known_hosts(&content);
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].algorithm().as_str(), "ssh-ed25519");
}

#[test]
fn test_parse_known_hosts_empty() {
    assert!(parse_known_hosts("").is_empty());
    assert!(parse_known_hosts("# nothing but comments\n").is_empty());
}

#[test]
fn test_attrs_to_info() {
    let mut attrs = FileAttributes::default();
    attrs.size = Some(42);
    attrs.permissions = Some(0o100644);
    attrs.mtime = Some(1_700_000_000);
    let info = attrs_to_info("file.txt", &attrs);
    assert_eq!(info.name, "file.txt");
    assert_eq!(info.size, 42);
    assert!(!info.is_dir);
    assert_eq!(info.modified.timestamp(), 1_700_000_000);

    let empty = FileAttributes::default();
    let info = attrs_to_info("other", &empty);
    assert_eq!(info.size, 0);
    assert_eq!(info.mode, 0);
}

#[test]
fn test_status_maps_to_not_exist() {
    use russh_sftp::protocol::Status;
    let err = russh_sftp::client::error::Error::Status(Status {
        id: 1,
        status_code: StatusCode::NoSuchFile,
        error_message: "no such file".to_owned(),
        language_tag: "en".to_owned(),
    });
    assert!(map_sftp_err(err, "missing.txt", "stat").is_not_exist());
}
