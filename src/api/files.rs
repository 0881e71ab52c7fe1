use bytes::Bytes;
use ipld_core::cid::Cid;
use serde::Deserialize;

use super::{arg, flag, IpfsClient, Query};
use crate::error::{Error, Result};

/// `files` commands, operating on the mutable file system of the daemon.
#[derive(Debug, Clone, Copy)]
pub struct Files<'a> {
    client: &'a IpfsClient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub hash: Cid,
    pub size: u64,
    pub cumulative_size: u64,
    pub blocks: u64,
    pub kind: FileType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesEntry {
    pub name: String,
    pub kind: FileType,
    pub size: u64,
    /// Empty listings of some versions omit the hash.
    pub hash: Option<Cid>,
}

#[derive(Clone, Debug)]
pub struct FilesWriteOptions {
    pub create: bool,
    pub parents: bool,
    pub truncate: bool,
    pub offset: Option<u64>,
    pub cid_version: Option<u8>,
    pub raw_leaves: Option<bool>,
}

impl Default for FilesWriteOptions {
    fn default() -> Self {
        Self {
            create: true,
            parents: false,
            truncate: true,
            offset: None,
            cid_version: None,
            raw_leaves: None,
        }
    }
}

impl FilesWriteOptions {
    pub fn parents(mut self) -> Self {
        self.parents = true;
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self.truncate = false;
        self
    }

    pub fn cid_version(mut self, version: u8) -> Self {
        self.cid_version = Some(version);
        self
    }

    fn query(&self, path: &str) -> Query {
        let mut query = vec![
            arg(path),
            flag("create", self.create),
            flag("parents", self.parents),
            flag("truncate", self.truncate),
        ];
        if let Some(offset) = self.offset {
            query.push(("offset", offset.to_string()));
        }
        if let Some(version) = self.cid_version {
            query.push(("cid-version", version.to_string()));
        }
        if let Some(raw) = self.raw_leaves {
            query.push(flag("raw-leaves", raw));
        }
        query
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatResponse {
    hash: String,
    #[serde(default, deserialize_with = "super::lenient_u64")]
    size: Option<u64>,
    #[serde(default, deserialize_with = "super::lenient_u64")]
    cumulative_size: Option<u64>,
    #[serde(default)]
    blocks: u64,
    #[serde(rename = "Type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LsResponse {
    #[serde(default)]
    entries: Option<Vec<LsEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LsEntry {
    name: String,
    #[serde(rename = "Type", default)]
    kind: u8,
    #[serde(default, deserialize_with = "super::lenient_u64")]
    size: Option<u64>,
    #[serde(default)]
    hash: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FlushResponse {
    cid: String,
}

impl TryFrom<StatResponse> for FileStat {
    type Error = Error;

    fn try_from(stat: StatResponse) -> Result<Self> {
        let kind = match stat.kind.as_str() {
            "file" => FileType::File,
            "directory" => FileType::Directory,
            other => return Err(Error::InvalidResponse(format!("unknown file type {other}"))),
        };
        Ok(FileStat {
            hash: stat.hash.parse()?,
            size: stat.size.unwrap_or_default(),
            cumulative_size: stat.cumulative_size.unwrap_or_default(),
            blocks: stat.blocks,
            kind,
        })
    }
}

impl TryFrom<LsEntry> for FilesEntry {
    type Error = Error;

    fn try_from(entry: LsEntry) -> Result<Self> {
        let hash = match entry.hash.as_deref() {
            None | Some("") => None,
            Some(hash) => Some(hash.parse()?),
        };
        Ok(FilesEntry {
            name: entry.name,
            // unixfs data types: 0 raw, 1 directory, 2 file
            kind: if entry.kind == 1 {
                FileType::Directory
            } else {
                FileType::File
            },
            size: entry.size.unwrap_or_default(),
            hash,
        })
    }
}

impl<'a> Files<'a> {
    pub(crate) fn new(client: &'a IpfsClient) -> Self {
        Self { client }
    }

    pub async fn mkdir(&self, path: &str, parents: bool) -> Result<()> {
        self.client
            .call("files/mkdir", vec![arg(path), flag("parents", parents)])
            .await?;
        Ok(())
    }

    pub async fn write(
        &self,
        path: &str,
        data: impl Into<Vec<u8>>,
        options: &FilesWriteOptions,
    ) -> Result<()> {
        self.client
            .call_with_data("files/write", options.query(path), data.into())
            .await?;
        Ok(())
    }

    /// Reads `count` bytes of the file starting at `offset`, the whole file when both are unset.
    pub async fn read(&self, path: &str, offset: Option<u64>, count: Option<u64>) -> Result<Bytes> {
        let mut query = vec![arg(path)];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }
        if let Some(count) = count {
            query.push(("count", count.to_string()));
        }
        self.client.call_bytes("files/read", query).await
    }

    pub async fn stat(&self, path: &str) -> Result<FileStat> {
        let stat: StatResponse = self.client.call_json("files/stat", vec![arg(path)]).await?;
        stat.try_into()
    }

    /// Lists a directory, sorted by name.
    pub async fn ls(&self, path: &str) -> Result<Vec<FilesEntry>> {
        let LsResponse { entries } = self
            .client
            .call_json("files/ls", vec![arg(path), flag("long", true)])
            .await?;

        let mut entries = entries
            .unwrap_or_default()
            .into_iter()
            .map(FilesEntry::try_from)
            .collect::<Result<Vec<_>>>()?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Copies `from`, an mfs path or an `/ipfs/` path, to `to`.
    pub async fn cp(&self, from: &str, to: &str, parents: bool) -> Result<()> {
        self.client
            .call("files/cp", vec![arg(from), arg(to), flag("parents", parents)])
            .await?;
        Ok(())
    }

    pub async fn mv(&self, from: &str, to: &str) -> Result<()> {
        self.client
            .call("files/mv", vec![arg(from), arg(to)])
            .await?;
        Ok(())
    }

    pub async fn rm(&self, path: &str, recursive: bool, force: bool) -> Result<()> {
        let query = vec![arg(path), flag("recursive", recursive), flag("force", force)];
        self.client.call("files/rm", query).await?;
        Ok(())
    }

    /// Writes the cached state of `path` to the blockstore and returns its root.
    pub async fn flush(&self, path: &str) -> Result<Cid> {
        let FlushResponse { cid } = self
            .client
            .call_json("files/flush", vec![arg(path)])
            .await?;
        Ok(cid.parse()?)
    }
}
