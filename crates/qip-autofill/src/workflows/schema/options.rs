use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use super::domain::{text_of, OptionItem};
use crate::api::{data_of, ApiRequest, RemoteApi};

type Catalog = HashMap<String, Vec<OptionItem>>;

/// Process-lifetime cache of the portal's option lists plus live dependent lookups.
pub struct OptionCatalog {
    api: Arc<dyn RemoteApi>,
    cache: Mutex<Option<Arc<Catalog>>>,
}

impl OptionCatalog {
    pub fn new(api: Arc<dyn RemoteApi>) -> Self {
        Self {
            api,
            cache: Mutex::new(None),
        }
    }

    /// Loads the whole catalog once. A failed load yields an empty catalog and is retried next call.
    fn catalog(&self) -> Arc<Catalog> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(catalog) = cache.as_ref() {
            return Arc::clone(catalog);
        }

        match self.api.execute(ApiRequest::get("/formdata/invt")) {
            Ok(response) => {
                let catalog = Arc::new(parse_catalog(data_of(&response)));
                debug!(lists = catalog.len(), "option catalog loaded");
                *cache = Some(Arc::clone(&catalog));
                catalog
            }
            Err(err) => {
                warn!(error = %err, "option catalog unavailable");
                Arc::new(Catalog::new())
            }
        }
    }

    pub fn options(&self, option_code: &str) -> Vec<OptionItem> {
        self.catalog()
            .get(option_code)
            .cloned()
            .unwrap_or_default()
    }

    /// Uniform pick over non-empty codes, falling back to non-null values.
    pub fn pick_one<R: Rng + ?Sized>(&self, option_code: &str, rng: &mut R) -> Option<Value> {
        let items = self.options(option_code);
        let codes: Vec<&String> = items.iter().filter_map(|item| item.code.as_ref()).collect();
        if let Some(code) = codes.choose(rng) {
            return Some(Value::String((*code).clone()));
        }
        let values: Vec<&Value> = items
            .iter()
            .map(|item| &item.value)
            .filter(|value| !value.is_null())
            .collect();
        values.choose(rng).map(|value| (*value).clone())
    }

    /// Samples `min(max(1, min_count), min(3, available))` distinct codes.
    pub fn pick_many<R: Rng + ?Sized>(
        &self,
        option_code: &str,
        min_count: usize,
        rng: &mut R,
    ) -> Vec<Value> {
        let codes: Vec<String> = self
            .options(option_code)
            .into_iter()
            .filter_map(|item| item.code)
            .collect();
        let count = min_count.max(1).min(codes.len().min(3));
        sample(codes, count, rng)
            .into_iter()
            .map(Value::String)
            .collect()
    }

    /// Child codes of one top-level group of a list.
    pub fn children_of(&self, option_code: &str, group_code: &str) -> Vec<String> {
        self.options(option_code)
            .into_iter()
            .find(|group| group.code.as_deref() == Some(group_code))
            .map(|group| {
                group
                    .children
                    .into_iter()
                    .filter_map(|child| child.code)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Live lookup of options that depend on a parent value. Never cached; failures yield `None`.
    pub fn pick_dependent<R: Rng + ?Sized>(
        &self,
        keyword: &str,
        parent_code: &Value,
        rng: &mut R,
    ) -> Option<Value> {
        let parent = text_of(parent_code).unwrap_or_else(|| parent_code.to_string());
        let request = ApiRequest::get("/formdata/invt/dependency_option")
            .query("keyword", keyword)
            .query("parent_code", &parent);

        let response = match self.api.execute(request) {
            Ok(response) => response,
            Err(err) => {
                warn!(keyword, parent = %parent, error = %err, "dependent option lookup failed");
                return None;
            }
        };

        let codes: Vec<String> = data_of(&response)
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("code").and_then(text_of))
                    .collect()
            })
            .unwrap_or_default();
        if codes.is_empty() {
            warn!(keyword, parent = %parent, "no dependent options");
            return None;
        }
        codes.choose(rng).cloned().map(Value::String)
    }
}

impl std::fmt::Debug for OptionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let loaded = self
            .cache
            .lock()
            .map(|cache| cache.is_some())
            .unwrap_or(false);
        f.debug_struct("OptionCatalog")
            .field("loaded", &loaded)
            .finish_non_exhaustive()
    }
}

/// Random sample without replacement, in random order.
pub(crate) fn sample<T, R: Rng + ?Sized>(mut items: Vec<T>, count: usize, rng: &mut R) -> Vec<T> {
    items.shuffle(rng);
    items.truncate(count);
    items
}

fn parse_catalog(data: &Value) -> Catalog {
    let Some(lists) = data.as_object() else {
        return Catalog::new();
    };
    lists
        .iter()
        .filter_map(|(code, items)| {
            serde_json::from_value::<Vec<OptionItem>>(items.clone())
                .ok()
                .map(|items| (code.clone(), items))
        })
        .collect()
}
