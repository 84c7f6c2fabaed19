//! Multipage app registry.
//!
//! Pages are identified by a stable hash of their script path, so a rerun
//! request can name the page it was issued from and the engine can detect
//! page switches without trusting client-supplied paths.

use rivulet_core::ids;
use rustc_hash::FxHashMap;
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageInfo {
    pub page_hash: String,
    pub name: String,
    pub script_path: String,
}

/// Registry of an app's pages. The main script is always page zero.
pub struct PagesManager {
    main: PageInfo,
    pages: Mutex<FxHashMap<String, PageInfo>>,
}

impl PagesManager {
    pub fn new(main_script_path: impl Into<String>) -> Self {
        let script_path = main_script_path.into();
        let main = PageInfo {
            page_hash: page_hash(&script_path),
            name: page_name(&script_path),
            script_path,
        };
        let mut pages = FxHashMap::default();
        pages.insert(main.page_hash.clone(), main.clone());
        Self {
            main,
            pages: Mutex::new(pages),
        }
    }

    pub fn main_page(&self) -> &PageInfo {
        &self.main
    }

    pub fn register_page(&self, script_path: impl Into<String>) -> PageInfo {
        let script_path = script_path.into();
        let info = PageInfo {
            page_hash: page_hash(&script_path),
            name: page_name(&script_path),
            script_path,
        };
        self.pages
            .lock()
            .unwrap()
            .insert(info.page_hash.clone(), info.clone());
        info
    }

    pub fn get_page(&self, page_hash: &str) -> Option<PageInfo> {
        self.pages.lock().unwrap().get(page_hash).cloned()
    }

    pub fn page_count(&self) -> usize {
        self.pages.lock().unwrap().len()
    }
}

fn page_hash(script_path: &str) -> String {
    ids::stable_id("page", &[script_path])
}

/// Display name: file stem with underscores as spaces.
fn page_name(script_path: &str) -> String {
    std::path::Path::new(script_path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().replace('_', " "))
        .unwrap_or_default()
}
