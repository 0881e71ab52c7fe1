use std::fmt;

use bytes::Bytes;
use ipld_core::cid::Cid;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::{arg, decode_ndjson, flag, IpfsClient, Query};
use crate::error::{Error, Result};

/// Options forwarded to `add`. Unset values leave the daemon's defaults in place.
#[derive(Clone, Debug, Default)]
pub struct AddOptions {
    pub cid_version: Option<u8>,
    pub raw_leaves: Option<bool>,
    pub pin: Option<bool>,
    /// Chunker spec, e.g. `size-262144` or `rabin`.
    pub chunker: Option<String>,
    pub hash: Option<String>,
    pub wrap_with_directory: bool,
    /// Only store the blocks and return the root, without announcing them.
    pub only_hash: bool,
}

impl AddOptions {
    pub fn cid_version(mut self, version: u8) -> Self {
        self.cid_version = Some(version);
        self
    }

    pub fn raw_leaves(mut self, raw: bool) -> Self {
        self.raw_leaves = Some(raw);
        self
    }

    pub fn pin(mut self, pin: bool) -> Self {
        self.pin = Some(pin);
        self
    }

    pub fn chunker(mut self, chunker: impl Into<String>) -> Self {
        self.chunker = Some(chunker.into());
        self
    }

    pub fn wrap_with_directory(mut self) -> Self {
        self.wrap_with_directory = true;
        self
    }

    fn query(&self) -> Query {
        let mut query = vec![
            flag("progress", false),
            flag("stream-channels", true),
        ];
        if let Some(version) = self.cid_version {
            query.push(("cid-version", version.to_string()));
        }
        if let Some(raw) = self.raw_leaves {
            query.push(flag("raw-leaves", raw));
        }
        if let Some(pin) = self.pin {
            query.push(flag("pin", pin));
        }
        if let Some(chunker) = &self.chunker {
            query.push(("chunker", chunker.clone()));
        }
        if let Some(hash) = &self.hash {
            query.push(("hash", hash.clone()));
        }
        if self.wrap_with_directory {
            query.push(flag("wrap-with-directory", true));
        }
        if self.only_hash {
            query.push(flag("only-hash", true));
        }
        query
    }
}

/// An entry of a tree passed to [`IpfsClient::add_all`]. Paths use `/` as separator and are
/// relative to the root of the tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddEntry {
    Directory { path: String },
    File { path: String, data: Vec<u8> },
}

impl AddEntry {
    pub fn dir(path: impl Into<String>) -> Self {
        AddEntry::Directory { path: path.into() }
    }

    pub fn file(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        AddEntry::File {
            path: path.into(),
            data: data.into(),
        }
    }

    fn into_part(self) -> Result<Part> {
        let part = match self {
            AddEntry::Directory { path } => Part::bytes(Vec::new())
                .file_name(urlencoding::encode(&path).into_owned())
                .mime_str("application/x-directory")?,
            AddEntry::File { path, data } => Part::bytes(data)
                .file_name(urlencoding::encode(&path).into_owned())
                .mime_str("application/octet-stream")?,
        };
        Ok(part)
    }
}

/// One line of the `add` output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddedFile {
    pub name: String,
    pub cid: Cid,
    pub size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddLine {
    #[serde(default)]
    name: String,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default, deserialize_with = "super::lenient_u64")]
    size: Option<u64>,
}

impl AddLine {
    fn into_added(self) -> Result<Option<AddedFile>> {
        let AddLine { name, hash, size } = self;
        // progress lines carry no hash
        let Some(hash) = hash else {
            return Ok(None);
        };
        Ok(Some(AddedFile {
            name,
            cid: hash.parse()?,
            size: size.unwrap_or_default(),
        }))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CatOptions {
    pub offset: Option<u64>,
    pub length: Option<u64>,
}

impl IpfsClient {
    /// Adds a single file, returning its root.
    pub async fn add(&self, data: impl Into<Vec<u8>>, options: &AddOptions) -> Result<AddedFile> {
        let entries = vec![AddEntry::file("data", data)];
        self.add_all(entries, options)
            .await?
            .pop()
            .ok_or_else(|| Error::InvalidResponse("add returned no entries".into()))
    }

    /// Adds a tree of entries. The returned list is in the order the daemon reported it, which
    /// ends with the root of the tree.
    pub async fn add_all(
        &self,
        entries: Vec<AddEntry>,
        options: &AddOptions,
    ) -> Result<Vec<AddedFile>> {
        let mut form = Form::new();
        for entry in entries {
            form = form.part("file", entry.into_part()?);
        }

        let request = self.request("add", &options.query())?.multipart(form);
        let response = self.send("add", request).await?;
        let body = response.bytes().await?;

        let lines: Vec<AddLine> = decode_ndjson("add", &body)?;
        let mut added = Vec::with_capacity(lines.len());
        for line in lines {
            if let Some(file) = line.into_added()? {
                added.push(file);
            }
        }

        debug!(count = added.len(), root = ?added.last().map(|f| f.cid), "added");
        Ok(added)
    }

    /// Reads the file at `path`, which is a cid or an `/ipfs/` or `/ipns/` path.
    pub async fn cat(&self, path: impl fmt::Display, options: CatOptions) -> Result<Bytes> {
        let mut query = vec![arg(path)];
        if let Some(offset) = options.offset {
            query.push(("offset", offset.to_string()));
        }
        if let Some(length) = options.length {
            query.push(("length", length.to_string()));
        }
        self.call_bytes("cat", query).await
    }
}
