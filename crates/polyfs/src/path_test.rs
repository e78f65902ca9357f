// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use rstest::rstest;

use super::*;

#[rstest]
#[case("", "")]
#[case(".", "")]
#[case("./a/b", "a/b")]
#[case("a//b/", "a/b")]
#[case("/a/b", "a/b")]
#[case("a/./b", "a/b")]
fn test_clean(#[case] given: &str, #[case] expected: &str) {
    assert_eq!(clean(given).unwrap(), expected);
}

#[rstest]
#[case("..")]
#[case("a/../b")]
#[case("../a")]
fn test_clean_rejects_parent_refs(#[case] given: &str) {
    assert!(matches!(clean(given), Err(Error::InvalidPath(_))));
}

#[rstest]
#[case("", "a", "a")]
#[case("a", "", "a")]
#[case("a/b", "c", "a/b/c")]
fn test_join(#[case] base: &str, #[case] name: &str, #[case] expected: &str) {
    assert_eq!(join(base, name), expected);
}

#[rstest]
#[case("archive.zip", true)]
#[case("ARCHIVE.ZIP", true)]
#[case("archive.Zip", true)]
#[case("archive.zip.bak", false)]
#[case(".zip", true)]
#[case("zip", false)]
#[case("archive", false)]
fn test_is_zip_name(#[case] name: &str, #[case] expected: bool) {
    assert_eq!(is_zip_name(name), expected);
}

#[rstest]
#[case("a/b.zip/c/d.txt", Some(("a/b.zip", "c/d.txt")))]
#[case("a/b.zip", Some(("a/b.zip", "")))]
#[case("outer.zip/inner.zip/data.bin", Some(("outer.zip/inner.zip", "data.bin")))]
#[case("a/.zip/c.txt", Some(("a/.zip", "c.txt")))]
#[case("a/b/c.txt", None)]
#[case("", None)]
fn test_split_zip_path(#[case] given: &str, #[case] expected: Option<(&str, &str)>) {
    let actual = split_zip_path(given).unwrap();
    let expected = expected.map(|(a, b)| (a.to_owned(), b.to_owned()));
    assert_eq!(actual, expected);
}

#[rstest]
fn test_base_name_and_parent() {
    assert_eq!(base_name("a/b/c.zip"), "c.zip");
    assert_eq!(parent("a/b/c.zip"), "a/b");
    assert_eq!(base_name("c.zip"), "c.zip");
    assert_eq!(parent("c.zip"), "");
}
