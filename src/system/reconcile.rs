//! Model reconciliation
//!
//! Merges what llama-swap has loaded, what the config declares and what sits
//! on disk into one sorted listing.

use std::collections::BTreeMap;

use crate::storage::local_models::model_id_from_file;
use crate::types::model::{ActiveMetadata, ActiveModel, ReconciledModel};

/// Union of the three identity sets, sorted by id.
///
/// Local file names lose their `.gguf` extension before matching; ids are
/// otherwise compared exactly.
pub fn reconcile<'a>(
    active: &[ActiveModel],
    configured: impl IntoIterator<Item = &'a str>,
    local_files: &[String],
) -> Vec<ReconciledModel> {
    let mut merged: BTreeMap<String, ReconciledModel> = BTreeMap::new();

    fn slot<'m>(merged: &'m mut BTreeMap<String, ReconciledModel>, id: &str) -> &'m mut ReconciledModel {
        merged
            .entry(id.to_string())
            .or_insert_with(|| ReconciledModel::new(id))
    }

    for model in active {
        let entry = slot(&mut merged, &model.id);
        entry.is_active = true;
        entry.active_metadata = Some(ActiveMetadata {
            owner: model.owned_by.clone(),
            created_at: model.created,
        });
    }

    for name in configured {
        slot(&mut merged, name).is_configured = true;
    }

    for file in local_files {
        slot(&mut merged, model_id_from_file(file)).has_local_file = true;
    }

    merged.into_values().collect()
}
