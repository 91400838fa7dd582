// III-IV
// Copyright 2023 Julio Merino
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License.  You may obtain a copy
// of the License at:
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.  See the
// License for the specific language governing permissions and limitations
// under the License.

//! Trivial templating engine and a cache of template files.

use futures::lock::Mutex;
use log::{debug, warn};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Performs various named string replacements in `input` based on `replacements`.
///
/// The `input` string can have `%key%` strings in it which will be replaced by the value of `key`
/// in `replacements`.  Keys without a replacement are left untouched.  Raw `%` characters can be
/// escaped via `%%` and nested expansions are not supported.
pub fn apply(input: &str, replacements: &[(&str, &str)]) -> String {
    let mut output = String::with_capacity(input.len());
    let mut partial_key: Option<String> = None;
    for ch in input.chars() {
        if ch == '%' {
            match partial_key.take() {
                Some(key) if key.is_empty() => output.push('%'),
                Some(key) => match replacements.iter().find(|(candidate, _)| *candidate == key) {
                    Some((_, value)) => output.push_str(value),
                    None => {
                        debug!("No replacement for %{}%", key);
                        output.push('%');
                        output.push_str(&key);
                        output.push('%');
                    }
                },
                None => partial_key = Some(String::new()),
            }
        } else {
            match partial_key.as_mut() {
                Some(k) => k.push(ch),
                None => output.push(ch),
            }
        }
    }
    if let Some(key) = partial_key {
        output.push('%');
        output.push_str(&key);
    }
    output
}

/// Formats the HTML snippet shown in place of a template that could not be read.
pub fn file_read_error(path: &Path, e: &io::Error) -> String {
    format!("<h2>File Read Error: {}: {}</h2>", path.display(), e)
}

/// A template file held in memory.
struct CachedPage {
    /// Contents of the file.
    text: String,

    /// Modification time of the file when it was read.
    modified: SystemTime,
}

/// Cache of template files keyed by their path.
///
/// Files are re-read when their modification time moves past the one seen on the previous read.
/// If a file cannot be inspected anymore, its cached contents are served as is.
#[derive(Default)]
pub struct PageCache {
    /// Cached files.
    pages: Mutex<HashMap<PathBuf, CachedPage>>,
}

impl PageCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the contents of the template file at `path`, reading it only if necessary.
    pub async fn read_template_file<P: AsRef<Path>>(&self, path: P) -> io::Result<String> {
        let path = path.as_ref();
        let mut pages = self.pages.lock().await;

        let modified = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => match pages.get(path) {
                Some(page) => {
                    warn!("Serving cached {} because it cannot be inspected: {}", path.display(), e);
                    return Ok(page.text.clone());
                }
                None => return Err(e),
            },
        };

        if let Some(page) = pages.get(path) {
            if modified <= page.modified {
                return Ok(page.text.clone());
            }
            debug!("Template {} changed on disk; reloading", path.display());
        }

        match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                pages.insert(path.to_owned(), CachedPage { text: text.clone(), modified });
                Ok(text)
            }
            Err(e) => match pages.get(path) {
                Some(page) => {
                    warn!("Serving cached {} because it cannot be read: {}", path.display(), e);
                    Ok(page.text.clone())
                }
                None => Err(e),
            },
        }
    }

    /// Reads the template at `path` and applies `replacements` to it, rendering an error snippet
    /// if the file cannot be read.
    pub async fn render(&self, path: &Path, replacements: &[(&str, &str)]) -> String {
        match self.read_template_file(path).await {
            Ok(text) => apply(&text, replacements),
            Err(e) => {
                warn!("Cannot read template {}: {}", path.display(), e);
                file_read_error(path, &e)
            }
        }
    }

    /// Returns the number of cached files.
    pub async fn page_cache_size(&self) -> usize {
        self.pages.lock().await.len()
    }
}
