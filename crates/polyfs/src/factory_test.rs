// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::*;
use crate::fs::{FileRead, FileSystem};
use crate::info::{DirEntry, FileInfo};

struct MarkerFs(&'static str);

impl fmt::Display for MarkerFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "marker({})", self.0)
    }
}

#[async_trait]
impl FileSystem for MarkerFs {
    async fn open(&self, name: &str) -> crate::Result<Box<dyn FileRead>> {
        Err(Error::NotExist(name.to_owned()))
    }

    async fn stat(&self, name: &str) -> crate::Result<FileInfo> {
        Err(Error::NotExist(name.to_owned()))
    }

    async fn read_dir(&self, _name: &str) -> crate::Result<Vec<DirEntry>> {
        Ok(Vec::new())
    }

    fn sub(&self, _dir: &str) -> crate::Result<SharedFs> {
        Err(Error::NotImplemented { op: "sub" })
    }
}

fn marker(tag: &'static str) -> impl Fn(Factory, String) -> ConstructorFuture {
    move |_factory, _path| Box::pin(async move { Ok(Arc::new(MarkerFs(tag)) as SharedFs) })
}

#[tokio::test]
async fn test_levels_scanned_descending() {
    let factory = FactoryBuilder::new()
        .register("^file://", Level::Low, marker("os"))
        .unwrap()
        .register(r"(?i)\.zip$", Level::High, marker("zip"))
        .unwrap()
        .build();

    let fs = factory.get("file:///data/archive.zip").await.unwrap();
    assert_eq!(fs.to_string(), "marker(zip)");

    let fs = factory.get("file:///data").await.unwrap();
    assert_eq!(fs.to_string(), "marker(os)");
}

#[tokio::test]
async fn test_same_level_registration_order_wins() {
    let factory = FactoryBuilder::new()
        .register("^file://", Level::Low, marker("first"))
        .unwrap()
        .register("^file://", Level::Low, marker("second"))
        .unwrap()
        .build();

    let fs = factory.get("file:///data").await.unwrap();
    assert_eq!(fs.to_string(), "marker(first)");
}

#[tokio::test]
async fn test_constructor_recursion() {
    let factory = FactoryBuilder::new()
        .register("^file://", Level::Low, marker("os"))
        .unwrap()
        .register(r"(?i)\.zip$", Level::High, |factory: Factory, path: String| {
            Box::pin(async move {
                let parent = crate::path::parent(&path);
                let base = factory.get(parent).await?;
                assert_eq!(base.to_string(), "marker(os)");
                Ok(Arc::new(MarkerFs("zip-over-base")) as SharedFs)
            })
        })
        .unwrap()
        .build();

    let fs = factory.get("file:///data/archive.zip").await.unwrap();
    assert_eq!(fs.to_string(), "marker(zip-over-base)");
}

#[tokio::test]
async fn test_unmatched_path_is_an_error() {
    let factory = FactoryBuilder::new()
        .register("^file://", Level::Low, marker("os"))
        .unwrap()
        .build();
    assert!(factory.get("s3://bucket/key").await.is_err());
}
