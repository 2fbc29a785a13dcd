use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::config::OrganizeConfig;
use crate::error::AppError;
use crate::models::browser::{GroupColor, TabId};
use crate::models::layout::{DesiredState, DomainSlot, SingleTab};
use crate::services::retry::RetryPolicy;
use crate::services::snapshot_service::Snapshot;
use crate::services::solver_service::{pack_domain_slots, ColorCycle};
use crate::state::{OrganizePhase, ProgressEvent, ProgressSink};

/// One tab as presented to the classifier. `index` is the position inside
/// its batch and is what the classifier answers with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierTab {
    pub index: usize,
    pub id: TabId,
    pub url: String,
    pub title: String,
    pub domain: String,
}

/// External topic classifier. Expected to answer
/// `{"groups": [{"name", "color", "tabIndices": []}]}`; anything else is
/// treated as malformed by the caller.
#[async_trait]
pub trait TabClassifier: Send + Sync {
    async fn classify(&self, batch: &[ClassifierTab]) -> Result<Value, AppError>;
}

/// A text-completion provider.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, AppError>;
}

/// Turns a completion provider into a `TabClassifier` by prompting for a
/// JSON answer and pulling the payload out of the reply.
pub struct CompletionClassifier<C> {
    completion: C,
}

impl<C: Completion> CompletionClassifier<C> {
    pub fn new(completion: C) -> Self {
        Self { completion }
    }
}

#[async_trait]
impl<C: Completion> TabClassifier for CompletionClassifier<C> {
    async fn classify(&self, batch: &[ClassifierTab]) -> Result<Value, AppError> {
        let prompt = build_classify_prompt(batch)?;
        let reply = self.completion.complete(&prompt).await?;
        let payload = extract_json_payload(&reply).ok_or_else(|| {
            AppError::Classifier("Model response did not contain a valid JSON payload".to_string())
        })?;
        let value: Value =
            serde_json::from_str(payload).map_err(|e| AppError::Classifier(e.to_string()))?;
        // A bare list of groups is accepted as the `groups` field.
        Ok(match value {
            Value::Array(groups) => serde_json::json!({ "groups": groups }),
            other => other,
        })
    }
}

/// Replays canned responses in order, one per batch.
#[derive(Debug, Default)]
pub struct ScriptedClassifier {
    responses: Mutex<VecDeque<Value>>,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new(responses: impl IntoIterator<Item = Value>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TabClassifier for ScriptedClassifier {
    async fn classify(&self, _batch: &[ClassifierTab]) -> Result<Value, AppError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .ok_or_else(|| AppError::Classifier("no scripted response left".to_string()))
    }
}

pub fn build_classify_prompt(batch: &[ClassifierTab]) -> Result<String, AppError> {
    let manifest = batch
        .iter()
        .map(|tab| {
            serde_json::json!({
                "i": tab.index,
                "title": tab.title,
                "url": tab.url,
                "domain": tab.domain,
            })
        })
        .collect::<Vec<_>>();
    let json_tabs = serde_json::to_string_pretty(&manifest)?;
    let colors = GroupColor::PALETTE
        .iter()
        .map(|color| color.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    Ok(format!(
        "You are sorting open browser tabs into topic groups.\n\
\n\
Choose short, descriptive group names (1-3 words) that describe what the\n\
user is working on, not just the website (e.g., \"Trip Planning\" not \"google.com\").\n\
Tabs that fit no topic may be left out.\n\
\n\
Tab manifest JSON:\n\
{json_tabs}\n\
\n\
Rules:\n\
1. Put each tab in at most one group, referenced by its \"i\".\n\
2. Pick a color from: {colors}.\n\
3. Return ONLY a JSON code block with this schema:\n\
```json\n\
{{\n\
  \"groups\": [\n\
    {{ \"name\": \"Trip Planning\", \"color\": \"blue\", \"tabIndices\": [0, 3] }}\n\
  ]\n\
}}\n\
```\n\
No other text."
    ))
}

/// Slices the JSON out of a model reply: the first fenced block if there
/// is one, else the outermost object or array in the text.
pub fn extract_json_payload(reply: &str) -> Option<&str> {
    if let Some(body) = fenced_block(reply) {
        return Some(body);
    }

    let open = reply.find(['{', '['])?;
    let close = if reply[open..].starts_with('{') { '}' } else { ']' };
    let end = reply.rfind(close).filter(|end| *end > open)?;
    Some(&reply[open..=end])
}

/// Body of the first fenced block, skipping its info string.
fn fenced_block(reply: &str) -> Option<&str> {
    let after_fence = &reply[reply.find("```")? + 3..];
    let body = &after_fence[after_fence.find('\n')? + 1..];
    let body = body[..body.find("```")?].trim();
    (!body.is_empty()).then_some(body)
}

/// A group as returned by one batch, indices still batch-relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawGroup {
    pub name: String,
    pub color: Option<GroupColor>,
    pub tab_indices: Vec<usize>,
}

/// Structural validation of one classifier response. `None` when `groups`
/// is missing or not an array; malformed entries inside it are skipped.
pub fn parse_groups(response: &Value) -> Option<Vec<RawGroup>> {
    let groups = response.get("groups")?.as_array()?;
    Some(
        groups
            .iter()
            .filter_map(|entry| {
                let name = entry.get("name")?.as_str()?.trim().to_string();
                if name.is_empty() {
                    return None;
                }
                let color = entry
                    .get("color")
                    .and_then(Value::as_str)
                    .and_then(|raw| raw.parse::<GroupColor>().ok());
                let tab_indices = entry
                    .get("tabIndices")
                    .and_then(Value::as_array)
                    .map(|indices| {
                        indices
                            .iter()
                            .filter_map(Value::as_u64)
                            .map(|index| index as usize)
                            .collect()
                    })
                    .unwrap_or_default();
                Some(RawGroup {
                    name,
                    color,
                    tab_indices,
                })
            })
            .collect(),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MergedGroup {
    name: String,
    color: Option<GroupColor>,
    tab_ids: Vec<TabId>,
}

/// Cross-batch accumulator. Groups merge on trimmed, lowercased name; a tab
/// already claimed by an earlier group is not claimed again.
#[derive(Debug, Default)]
struct GroupMerger {
    groups: Vec<MergedGroup>,
    by_key: HashMap<String, usize>,
    claimed: HashSet<TabId>,
}

impl GroupMerger {
    fn absorb(&mut self, batch: &[ClassifierTab], groups: Vec<RawGroup>) {
        for raw in groups {
            let key = raw.name.trim().to_lowercase();
            let slot = match self.by_key.get(&key) {
                Some(slot) => *slot,
                None => {
                    self.groups.push(MergedGroup {
                        name: raw.name.clone(),
                        color: raw.color,
                        tab_ids: Vec::new(),
                    });
                    self.by_key.insert(key, self.groups.len() - 1);
                    self.groups.len() - 1
                }
            };
            let group = &mut self.groups[slot];
            if group.color.is_none() {
                group.color = raw.color;
            }
            for index in raw.tab_indices {
                let Some(tab) = batch.get(index) else {
                    continue;
                };
                if self.claimed.insert(tab.id) {
                    group.tab_ids.push(tab.id);
                }
            }
        }
    }
}

fn classifier_batches(snapshot: &Snapshot, config: &OrganizeConfig) -> Vec<Vec<ClassifierTab>> {
    let eligible = snapshot
        .tabs_by_window
        .values()
        .flatten()
        .filter_map(|id| snapshot.tab(*id))
        .filter(|tab| tab.is_web_page())
        .filter(|tab| !(config.exclude_pinned && tab.pinned))
        .collect::<Vec<_>>();

    eligible
        .chunks(config.classifier_batch_size.max(1))
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .map(|(index, tab)| ClassifierTab {
                    index,
                    id: tab.id,
                    url: tab.url.clone(),
                    title: tab.title.clone(),
                    domain: snapshot.domain(tab.id).to_string(),
                })
                .collect()
        })
        .collect()
}

/// Topic layout from the classifier. `None` means the caller should fall
/// back to the deterministic solver: no eligible tabs, a failed call, a
/// malformed response in any batch, or no non-empty group.
pub async fn solve_with_classifier(
    snapshot: &Snapshot,
    classifier: &dyn TabClassifier,
    config: &OrganizeConfig,
    progress: &dyn ProgressSink,
) -> Option<DesiredState> {
    let batches = classifier_batches(snapshot, config);
    if batches.is_empty() {
        tracing::info!("no web tabs to classify");
        return None;
    }

    let policy = RetryPolicy::exponential(config.classifier_retry_attempts);
    let total = batches.len();
    let mut merger = GroupMerger::default();

    for (batch_index, batch) in batches.iter().enumerate() {
        progress.on_progress(ProgressEvent::new(
            OrganizePhase::Classifying,
            batch_index,
            total,
            format!("Classifying batch {}/{total}", batch_index + 1),
        ));

        let response = match policy
            .run(|_| classifier.classify(batch), AppError::is_retryable)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(batch = batch_index, error = %err, "classifier call failed");
                return None;
            }
        };
        let Some(groups) = parse_groups(&response) else {
            tracing::warn!(batch = batch_index, "classifier response has no groups array");
            return None;
        };
        merger.absorb(batch, groups);
    }

    progress.on_progress(ProgressEvent::new(
        OrganizePhase::Classifying,
        total,
        total,
        "Classification complete",
    ));

    let mut colors = ColorCycle::default();
    let slots = merger
        .groups
        .into_iter()
        .filter(|group| !group.tab_ids.is_empty())
        .map(|group| DomainSlot {
            domain: group.name.clone(),
            label: group.name,
            tab_ids: group.tab_ids,
            color: group.color.unwrap_or_else(|| colors.next_color()),
        })
        .collect::<Vec<_>>();
    if slots.is_empty() {
        tracing::warn!("classifier returned no usable groups");
        return None;
    }

    let window_slots = pack_domain_slots(slots, config.window_cap, 0);
    let claimed = merger.claimed;
    let singles = snapshot
        .tabs_by_window
        .values()
        .flatten()
        .filter(|id| !claimed.contains(*id))
        .filter_map(|id| snapshot.tab(*id))
        .filter(|tab| !(config.exclude_pinned && tab.pinned))
        .map(|tab| SingleTab {
            tab_id: tab.id,
            domain: snapshot.domain(tab.id).to_string(),
        })
        .collect::<Vec<_>>();

    tracing::info!(
        window_slots = window_slots.len(),
        singles = singles.len(),
        "classifier layout solved"
    );
    Some(DesiredState {
        window_slots,
        singles,
    })
}
