//! GitLab REST client with an on-disk response cache.

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::core::{Comment, Position};

/// Environment variable holding the private access token.
pub const TOKEN_ENV: &str = "MRLENS_TOKEN";

/// On-disk cache file, relative to the working directory.
const CACHE_FILE: &str = "mrlens-cache.json";

/// Errors from remote operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RemoteError {
    /// Non-success HTTP status.
    #[error("request to {url} failed with status {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
    /// Connection/transport failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// Response body did not decode as expected.
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        /// Requested URL.
        url: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// Local I/O failure (cache file, body read).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A URL that could not be built.
    #[error("invalid url: {0}")]
    BadUrl(String),
}

/// One changed file in a merge request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Change {
    /// Path in the old revision.
    pub old_path: String,
    /// Path in the new revision.
    pub new_path: String,
    /// Unified diff text for this file.
    #[serde(default)]
    pub diff: String,
    /// File was created by this change.
    #[serde(default)]
    pub new_file: bool,
    /// File was renamed by this change.
    #[serde(default)]
    pub renamed_file: bool,
    /// File was deleted by this change.
    #[serde(default)]
    pub deleted_file: bool,
}

/// The three revisions a merge request's diff is anchored to.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiffRefs {
    /// Merge-base of source and target.
    #[serde(default)]
    pub base_sha: String,
    /// Tip of the source branch.
    #[serde(default)]
    pub head_sha: String,
    /// Where the source branch started.
    #[serde(default)]
    pub start_sha: String,
}

/// A note's author.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Author {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Login name.
    #[serde(default)]
    pub username: String,
}

/// A note's anchor within the diff, as sent on the wire. GitLab uses `null`
/// (or omits the field) for the side that does not apply.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotePosition {
    /// Path in the old revision.
    #[serde(default)]
    pub old_path: String,
    /// Path in the new revision.
    #[serde(default)]
    pub new_path: String,
    /// 1-based old line number.
    #[serde(default)]
    pub old_line: Option<usize>,
    /// 1-based new line number.
    #[serde(default)]
    pub new_line: Option<usize>,
}

/// One note within a discussion.
#[derive(Debug, Clone, Deserialize)]
pub struct Note {
    /// Remote note id.
    pub id: u64,
    /// Note type; diff-anchored notes are `"DiffNote"`.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Note text.
    #[serde(default)]
    pub body: String,
    /// Author info.
    #[serde(default)]
    pub author: Author,
    /// Diff anchor; absent for non-diff notes.
    #[serde(default)]
    pub position: Option<NotePosition>,
}

/// A remote discussion: a group of notes sharing one anchor.
#[derive(Debug, Clone, Deserialize)]
pub struct Discussion {
    /// Remote discussion id (hex string).
    pub id: String,
    /// Notes in thread order.
    #[serde(default)]
    pub notes: Vec<Note>,
}

/// A merge request snapshot: metadata, changed files, and discussions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MergeRequest {
    /// Global id.
    #[serde(default)]
    pub id: u64,
    /// Project-scoped id (the one in URLs).
    #[serde(default)]
    pub iid: u64,
    /// Owning project id.
    #[serde(default)]
    pub project_id: u64,
    /// Title line.
    #[serde(default)]
    pub title: String,
    /// Current state (opened/merged/closed).
    #[serde(default)]
    pub state: String,
    /// Branch the change is merged into.
    #[serde(default)]
    pub target_branch: String,
    /// Branch the change comes from.
    #[serde(default)]
    pub source_branch: String,
    /// Changed files.
    #[serde(default)]
    pub changes: Vec<Change>,
    /// Diff anchor revisions.
    #[serde(default)]
    pub diff_refs: DiffRefs,
    /// Discussions, fetched separately.
    #[serde(default, skip_deserializing)]
    pub discussions: Vec<Discussion>,
}

/// A parsed merge request URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MrTarget {
    /// Scheme + host (+ port), no trailing slash.
    pub host: String,
    /// Full project path, e.g. `group/project`.
    pub project: String,
    /// Project-scoped merge request id.
    pub iid: u64,
}

impl MrTarget {
    /// Parse `{host}/{project}/-/merge_requests/{id}`.
    pub fn parse(input: &str) -> Result<Self, RemoteError> {
        let url = Url::parse(input).map_err(|e| RemoteError::BadUrl(e.to_string()))?;

        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}://{}:{}", url.scheme(), host, port),
            (Some(host), None) => format!("{}://{}", url.scheme(), host),
            (None, _) => return Err(RemoteError::BadUrl("missing host".to_string())),
        };

        let path = url.path();
        let (project, rest) = path
            .trim_start_matches('/')
            .split_once("/-/merge_requests/")
            .ok_or_else(|| RemoteError::BadUrl(format!("not a merge request url: {input}")))?;

        if project.is_empty() {
            return Err(RemoteError::BadUrl("empty project path".to_string()));
        }

        let iid = rest
            .split('/')
            .next()
            .unwrap_or("")
            .parse()
            .map_err(|_| RemoteError::BadUrl(format!("bad merge request id in {input}")))?;

        Ok(Self {
            host,
            project: project.to_string(),
            iid,
        })
    }

    /// The API root for this host.
    pub fn api_url(&self) -> String {
        format!("{}/api", self.host)
    }
}

/// Authenticated GitLab API client.
///
/// GET responses are cached in memory and persisted to [`CACHE_FILE`] so a
/// review session can be reopened without refetching; any mutation batch
/// invalidates the cache through [`GitLab::invalidate_cache`].
pub struct GitLab {
    agent: ureq::Agent,
    api_url: Url,
    token: String,
    cache_path: PathBuf,
    cache: Mutex<HashMap<String, Vec<u8>>>,
}

impl std::fmt::Debug for GitLab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitLab")
            .field("api_url", &self.api_url.as_str())
            .field("cache_path", &self.cache_path)
            .finish()
    }
}

impl GitLab {
    /// Create a client for `api_url` (e.g. `https://host/api`), restoring
    /// the response cache from disk if present.
    pub fn new(api_url: &str, token: String) -> Result<Self, RemoteError> {
        Self::with_cache_path(api_url, token, PathBuf::from(CACHE_FILE))
    }

    /// Create a client with an explicit cache location (for testing).
    pub fn with_cache_path(
        api_url: &str,
        token: String,
        cache_path: PathBuf,
    ) -> Result<Self, RemoteError> {
        let api_url = Url::parse(api_url).map_err(|e| RemoteError::BadUrl(e.to_string()))?;
        let cache = match std::fs::read(&cache_path) {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
                tracing::debug!(error = %e, "cache file unreadable, starting empty");
                HashMap::new()
            }),
            Err(_) => {
                tracing::debug!("no cache file, starting empty");
                HashMap::new()
            }
        };

        Ok(Self {
            agent: ureq::AgentBuilder::new().build(),
            api_url,
            token,
            cache_path,
            cache: Mutex::new(cache),
        })
    }

    /// Drop all cached responses, in memory and on disk.
    pub fn invalidate_cache(&self) {
        self.cache.lock().clear();
        if let Err(e) = std::fs::remove_file(&self.cache_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(error = %e, "failed to remove cache file");
            }
        }
    }

    /// Persist the in-memory cache (atomic temp-file + rename).
    fn persist_cache(&self, cache: &HashMap<String, Vec<u8>>) {
        let write = || -> std::io::Result<()> {
            let data = serde_json::to_vec(cache)?;
            let temp = self.cache_path.with_extension("json.tmp");
            std::fs::write(&temp, data)?;
            std::fs::rename(&temp, &self.cache_path)?;
            Ok(())
        };
        if let Err(e) = write() {
            tracing::warn!(error = %e, "failed to persist cache file");
        }
    }

    fn read_body(resp: ureq::Response) -> Result<Vec<u8>, RemoteError> {
        let mut body = Vec::new();
        resp.into_reader()
            .read_to_end(&mut body)
            .map_err(RemoteError::Io)?;
        Ok(body)
    }

    fn map_ureq(url: &str, err: ureq::Error) -> RemoteError {
        match err {
            ureq::Error::Status(status, _) => RemoteError::Status {
                url: url.to_string(),
                status,
            },
            ureq::Error::Transport(t) => RemoteError::Transport(t.to_string()),
        }
    }

    /// Authenticated GET with caching.
    pub fn get(&self, url: &Url) -> Result<Vec<u8>, RemoteError> {
        let key = url.as_str().to_string();

        if let Some(cached) = self.cache.lock().get(&key) {
            tracing::trace!(url = %key, "cache hit");
            return Ok(cached.clone());
        }

        tracing::debug!(url = %key, "GET");
        let resp = self
            .agent
            .get(url.as_str())
            .set("PRIVATE-TOKEN", &self.token)
            .call()
            .map_err(|e| Self::map_ureq(&key, e))?;
        let body = Self::read_body(resp)?;

        let mut cache = self.cache.lock();
        cache.insert(key, body.clone());
        self.persist_cache(&cache);

        Ok(body)
    }

    /// Authenticated form POST. Never cached.
    pub fn post_form(&self, url: &Url, form: &[(&str, &str)]) -> Result<Vec<u8>, RemoteError> {
        let key = url.as_str().to_string();
        tracing::debug!(url = %key, "POST");
        let resp = self
            .agent
            .post(url.as_str())
            .set("PRIVATE-TOKEN", &self.token)
            .send_form(form)
            .map_err(|e| Self::map_ureq(&key, e))?;
        Self::read_body(resp)
    }

    /// Authenticated DELETE. Never cached.
    pub fn delete(&self, url: &Url) -> Result<Vec<u8>, RemoteError> {
        let key = url.as_str().to_string();
        tracing::debug!(url = %key, "DELETE");
        let resp = self
            .agent
            .delete(url.as_str())
            .set("PRIVATE-TOKEN", &self.token)
            .call()
            .map_err(|e| Self::map_ureq(&key, e))?;
        Self::read_body(resp)
    }

    /// Build `{api}/v4/<segments>`; each segment is percent-encoded, so a
    /// project path like `group/proj` becomes one `group%2Fproj` segment.
    fn v4_url(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.api_url.clone();
        {
            let mut parts = url
                .path_segments_mut()
                .map_err(|_| RemoteError::BadUrl("api url cannot be a base".to_string()))?;
            parts.pop_if_empty();
            parts.push("v4");
            for segment in segments {
                parts.push(segment);
            }
        }
        Ok(url)
    }

    fn decode<T: serde::de::DeserializeOwned>(url: &Url, body: &[u8]) -> Result<T, RemoteError> {
        serde_json::from_slice(body).map_err(|source| RemoteError::Decode {
            url: url.as_str().to_string(),
            source,
        })
    }

    /// Fetch a merge request's changes and discussions, attaching each
    /// discussion's id to its notes.
    pub fn fetch_mr(&self, project: &str, iid: u64) -> Result<MergeRequest, RemoteError> {
        let iid_str = iid.to_string();

        let url = self.v4_url(&["projects", project, "merge_requests", &iid_str, "changes"])?;
        let body = self.get(&url)?;
        let mut mr: MergeRequest = Self::decode(&url, &body)?;

        let url = self.v4_url(&["projects", project, "merge_requests", &iid_str, "discussions"])?;
        let body = self.get(&url)?;
        mr.discussions = Self::decode(&url, &body)?;

        Ok(mr)
    }

    /// Fetch the raw contents of `path` at `ref_sha`.
    pub fn fetch_file_raw(
        &self,
        project: &str,
        path: &str,
        ref_sha: &str,
    ) -> Result<String, RemoteError> {
        let mut url = self.v4_url(&["projects", project, "repository", "files", path, "raw"])?;
        url.query_pairs_mut().append_pair("ref", ref_sha);
        let body = self.get(&url)?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Create a new discussion from a draft comment.
    ///
    /// Does not invalidate the cache; the submitting job invalidates once
    /// after the whole batch.
    pub fn create_discussion(
        &self,
        draft: &Comment,
        mr: &MergeRequest,
    ) -> Result<(), RemoteError> {
        let pos = draft.position();
        let project_id = mr.project_id.to_string();
        let iid = mr.iid.to_string();
        let url = self.v4_url(&["projects", &project_id, "merge_requests", &iid, "discussions"])?;

        let old_line = pos.old_line.filter(|&n| n > 0).map(|n| n.to_string());
        let new_line = pos.new_line.filter(|&n| n > 0).map(|n| n.to_string());

        let mut form: Vec<(&str, &str)> = vec![
            ("body", draft.body()),
            ("position[position_type]", "text"),
            ("position[base_sha]", &mr.diff_refs.base_sha),
            ("position[head_sha]", &mr.diff_refs.head_sha),
            ("position[start_sha]", &mr.diff_refs.start_sha),
            ("position[old_path]", &pos.old_path),
            ("position[new_path]", &pos.new_path),
        ];
        if let Some(old) = old_line.as_deref() {
            form.push(("position[old_line]", old));
        }
        if let Some(new) = new_line.as_deref() {
            form.push(("position[new_line]", new));
        }

        self.post_form(&url, &form)?;
        Ok(())
    }

    /// Delete one note from a discussion.
    ///
    /// Does not invalidate the cache; the deleting job invalidates once on
    /// success.
    pub fn delete_note(
        &self,
        mr: &MergeRequest,
        discussion_id: &str,
        note_id: u64,
    ) -> Result<(), RemoteError> {
        let project_id = mr.project_id.to_string();
        let iid = mr.iid.to_string();
        let note = note_id.to_string();
        let url = self.v4_url(&[
            "projects",
            &project_id,
            "merge_requests",
            &iid,
            "discussions",
            discussion_id,
            "notes",
            &note,
        ])?;
        self.delete(&url)?;
        Ok(())
    }
}

/// Convert a remote diff note into a persisted [`Comment`].
pub fn note_to_comment(note: &Note, discussion_id: &str) -> Option<Comment> {
    let pos = note.position.as_ref()?;
    Some(Comment::Persisted {
        id: note.id,
        discussion_id: discussion_id.to_string(),
        author: note.author.name.clone(),
        body: note.body.clone(),
        position: Position {
            old_path: pos.old_path.clone(),
            new_path: pos.new_path.clone(),
            old_line: pos.old_line.filter(|&n| n > 0),
            new_line: pos.new_line.filter(|&n| n > 0),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mr_url() {
        let target =
            MrTarget::parse("https://gitlab.example.com/group/proj/-/merge_requests/42").unwrap();
        assert_eq!(target.host, "https://gitlab.example.com");
        assert_eq!(target.project, "group/proj");
        assert_eq!(target.iid, 42);
        assert_eq!(target.api_url(), "https://gitlab.example.com/api");
    }

    #[test]
    fn parse_mr_url_nested_groups_and_port() {
        let target =
            MrTarget::parse("http://git.local:8080/a/b/c/-/merge_requests/7/diffs").unwrap();
        assert_eq!(target.host, "http://git.local:8080");
        assert_eq!(target.project, "a/b/c");
        assert_eq!(target.iid, 7);
    }

    #[test]
    fn parse_rejects_non_mr_urls() {
        assert!(MrTarget::parse("https://gitlab.example.com/group/proj").is_err());
        assert!(MrTarget::parse("not a url").is_err());
        assert!(MrTarget::parse("https://gitlab.example.com/g/p/-/merge_requests/abc").is_err());
    }

    fn test_client(dir: &std::path::Path) -> GitLab {
        GitLab::with_cache_path(
            "https://gitlab.example.com/api",
            "secret".to_string(),
            dir.join("cache.json"),
        )
        .unwrap()
    }

    #[test]
    fn v4_url_encodes_project_as_one_segment() {
        let dir = tempfile::tempdir().unwrap();
        let gl = test_client(dir.path());

        let url = gl
            .v4_url(&["projects", "group/proj", "merge_requests", "42", "changes"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://gitlab.example.com/api/v4/projects/group%2Fproj/merge_requests/42/changes"
        );
    }

    #[test]
    fn file_url_encodes_path_and_ref() {
        let dir = tempfile::tempdir().unwrap();
        let gl = test_client(dir.path());

        let mut url = gl
            .v4_url(&["projects", "g/p", "repository", "files", "src/main.rs", "raw"])
            .unwrap();
        url.query_pairs_mut().append_pair("ref", "abc123");
        assert_eq!(
            url.as_str(),
            "https://gitlab.example.com/api/v4/projects/g%2Fp/repository/files/src%2Fmain.rs/raw?ref=abc123"
        );
    }

    #[test]
    fn cache_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let mut map = HashMap::new();
        map.insert("https://x/y".to_string(), b"body".to_vec());
        {
            let gl = GitLab::with_cache_path("https://x/api", "t".to_string(), path.clone())
                .unwrap();
            gl.persist_cache(&map);
        }
        assert!(path.exists());

        let gl = GitLab::with_cache_path("https://x/api", "t".to_string(), path.clone()).unwrap();
        assert_eq!(
            gl.cache.lock().get("https://x/y").map(|v| v.as_slice()),
            Some(b"body".as_slice())
        );

        gl.invalidate_cache();
        assert!(!path.exists());
        assert!(gl.cache.lock().is_empty());
    }

    #[test]
    fn merge_request_decoding() {
        let body = br#"{
            "id": 1, "iid": 42, "project_id": 9, "title": "Fix things",
            "state": "opened", "target_branch": "main", "source_branch": "fix",
            "changes": [
                {"old_path": "a.rs", "new_path": "a.rs", "diff": "@@ -1 +1 @@\n-x\n+y\n",
                 "new_file": false, "renamed_file": false, "deleted_file": false}
            ],
            "diff_refs": {"base_sha": "b", "head_sha": "h", "start_sha": "s"}
        }"#;
        let mr: MergeRequest = serde_json::from_slice(body).unwrap();
        assert_eq!(mr.iid, 42);
        assert_eq!(mr.changes.len(), 1);
        assert_eq!(mr.diff_refs.head_sha, "h");
    }

    #[test]
    fn discussion_decoding_and_note_conversion() {
        let body = br#"[
            {"id": "d34db33f", "notes": [
                {"id": 7, "type": "DiffNote", "body": "why?",
                 "author": {"name": "alice", "username": "al"},
                 "position": {"old_path": "a.rs", "new_path": "a.rs",
                              "old_line": null, "new_line": 2}}
            ]}
        ]"#;
        let discussions: Vec<Discussion> = serde_json::from_slice(body).unwrap();
        assert_eq!(discussions.len(), 1);

        let note = &discussions[0].notes[0];
        assert_eq!(note.kind.as_deref(), Some("DiffNote"));

        let comment = note_to_comment(note, &discussions[0].id).unwrap();
        assert!(!comment.is_pending());
        assert_eq!(comment.anchor_key(), "+2");
        match comment {
            Comment::Persisted {
                id, discussion_id, ..
            } => {
                assert_eq!(id, 7);
                assert_eq!(discussion_id, "d34db33f");
            }
            Comment::Pending { .. } => unreachable!(),
        }
    }
}
