//! The portable Studio story model: the `story.json` graph of stage and
//! action nodes, its invariants, and the positional views the native
//! indices are generated from.
//!
//! The graph references everything by UUID; the device format references
//! everything by position. [`PackIndex`] is the one place that mapping is
//! computed. It is built in a single pass over the story and read-only from
//! then on, so every index writer downstream is a pure function of it.

use serde::{Deserialize, Deserializer};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use pack_writer::node_index::{ControlFlags, StageEntry, TransitionEntry};

/// Top-level shape of `story.json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Declared pack identity; the entrypoint stage's uuid stands in when
    /// absent.
    #[serde(default)]
    pub uuid: Option<Uuid>,
    /// Story version counter, echoed into the `ni` header.
    #[serde(default = "default_pack_version")]
    pub version: i16,
    pub stage_nodes: Vec<StageNode>,
    #[serde(default)]
    pub action_nodes: Vec<ActionNode>,
}

fn default_pack_version() -> i16 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Entrypoint,
    Menu,
    Story,
    Cover,
}

/// One screen of the navigation graph.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageNode {
    pub uuid: Uuid,
    /// Older Studio exports call this field `type`.
    #[serde(alias = "type")]
    pub kind: StageKind,
    pub name: String,
    #[serde(default, deserialize_with = "non_empty_str")]
    pub image: Option<String>,
    /// Navigation announcement played when the stage is shown. The device
    /// audio slot plays this and nothing else; stages without it get the
    /// blank sentinel.
    #[serde(default, deserialize_with = "non_empty_str")]
    pub audio: Option<String>,
    /// Long-form content name some exports carry on story stages. The
    /// device indices never reference it.
    #[serde(default, deserialize_with = "non_empty_str")]
    pub story_audio: Option<String>,
    #[serde(default)]
    pub ok_transition: Option<Transition>,
    #[serde(default)]
    pub home_transition: Option<Transition>,
    #[serde(default)]
    pub control_settings: ControlSettings,
}

/// Studio exports write absent assets as empty strings; treat those as None.
/// https://github.com/serde-rs/serde/issues/1425#issuecomment-439729881
fn non_empty_str<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let o: Option<String> = Option::deserialize(d)?;
    Ok(o.filter(|s| !s.is_empty()))
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub action_node: Uuid,
    #[serde(default)]
    pub option_index: i32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ControlSettings {
    #[serde(default = "enabled")]
    pub wheel: bool,
    #[serde(default = "enabled")]
    pub ok: bool,
    #[serde(default = "enabled")]
    pub home: bool,
    #[serde(default)]
    pub pause: bool,
    #[serde(default)]
    pub autoplay: bool,
}

fn enabled() -> bool {
    true
}

impl Default for ControlSettings {
    fn default() -> Self {
        ControlSettings {
            wheel: true,
            ok: true,
            home: true,
            pause: false,
            autoplay: false,
        }
    }
}

/// One choice point: an ordered run of sibling stages.
#[derive(Debug, Deserialize)]
pub struct ActionNode {
    pub id: Uuid,
    #[serde(default)]
    pub options: Vec<Uuid>,
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("expected exactly one entrypoint stage, found {0}")]
    EntrypointCount(usize),

    #[error("stage {stage} references unknown action node {action}")]
    UnknownAction { stage: Uuid, action: Uuid },

    #[error("action node {action} references unknown stage {stage}")]
    UnknownStage { action: Uuid, stage: Uuid },
}

impl Story {
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Check the graph invariants that must hold before any output is
    /// produced. Asset existence is the archive's concern and is checked
    /// separately.
    pub fn validate(&self) -> Result<(), GraphError> {
        let entrypoints = self
            .stage_nodes
            .iter()
            .filter(|node| node.kind == StageKind::Entrypoint)
            .count();
        if entrypoints != 1 {
            return Err(GraphError::EntrypointCount(entrypoints));
        }
        let stages: HashSet<Uuid> = self.stage_nodes.iter().map(|node| node.uuid).collect();
        let actions: HashSet<Uuid> = self.action_nodes.iter().map(|node| node.id).collect();
        for node in &self.stage_nodes {
            for transition in [&node.ok_transition, &node.home_transition]
                .into_iter()
                .flatten()
            {
                if !actions.contains(&transition.action_node) {
                    return Err(GraphError::UnknownAction {
                        stage: node.uuid,
                        action: transition.action_node,
                    });
                }
            }
        }
        for action in &self.action_nodes {
            for option in &action.options {
                if !stages.contains(option) {
                    return Err(GraphError::UnknownStage {
                        action: action.id,
                        stage: *option,
                    });
                }
            }
        }
        Ok(())
    }

    /// The single entrypoint stage. Meaningful after [`Story::validate`].
    pub fn entrypoint(&self) -> Option<&StageNode> {
        self.stage_nodes
            .iter()
            .find(|node| node.kind == StageKind::Entrypoint)
    }

    /// Every asset name the indices will reference, images first,
    /// declaration order, no duplicates. `storyAudio` names are not device
    /// assets and don't appear here.
    pub fn referenced_assets(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let images = self
            .stage_nodes
            .iter()
            .filter_map(|node| node.image.as_deref());
        let audio = self
            .stage_nodes
            .iter()
            .filter_map(|node| node.audio.as_deref());
        images
            .chain(audio)
            .filter(|name| seen.insert(*name))
            .collect()
    }
}

/// One entry of the positional image list.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    pub position: u32,
    pub name: String,
}

/// What a stage's audio slot plays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// A named asset from the archive.
    Asset(String),
    /// The canonical blank MP3.
    Blank,
}

/// One entry of the positional audio list: exactly one per stage, never
/// deduplicated (the firmware indexes slots by stage).
#[derive(Debug, Clone)]
pub struct AudioSlot {
    pub position: u32,
    pub source: AudioSource,
}

/// One entry of the list-node index. `absolute_position` is the element
/// offset of this node's option run inside `li`; `ni` transitions point
/// through it.
#[derive(Debug, Clone)]
pub struct ListNode {
    pub id: Uuid,
    pub options: Vec<Uuid>,
    pub position: u32,
    pub absolute_position: u32,
}

/// The positional views of a story, built once and read-only afterwards.
#[derive(Debug)]
pub struct PackIndex {
    pub images: Vec<ImageAsset>,
    pub audio: Vec<AudioSlot>,
    pub lists: Vec<ListNode>,
}

impl PackIndex {
    pub fn build(story: &Story) -> Self {
        // Images deduplicate by name: two stages sharing artwork point at
        // the same device file.
        let mut images = Vec::new();
        let mut image_positions: HashMap<&str, u32> = HashMap::new();
        for node in &story.stage_nodes {
            if let Some(name) = node.image.as_deref() {
                if !image_positions.contains_key(name) {
                    let position = images.len() as u32;
                    image_positions.insert(name, position);
                    images.push(ImageAsset {
                        position,
                        name: name.to_owned(),
                    });
                }
            }
        }

        let audio = story
            .stage_nodes
            .iter()
            .enumerate()
            .map(|(position, node)| AudioSlot {
                position: position as u32,
                source: match node.audio.as_deref() {
                    Some(name) => AudioSource::Asset(name.to_owned()),
                    None => AudioSource::Blank,
                },
            })
            .collect();

        let mut cursor = 0u32;
        let lists = story
            .action_nodes
            .iter()
            .enumerate()
            .map(|(position, action)| {
                let node = ListNode {
                    id: action.id,
                    options: action.options.clone(),
                    position: position as u32,
                    absolute_position: cursor,
                };
                cursor += action.options.len() as u32;
                node
            })
            .collect();

        PackIndex {
            images,
            audio,
            lists,
        }
    }

    /// The flattened `li` payload: every option run resolved to stage
    /// positions. Unknown uuids resolve to 0, which validation rules out.
    pub fn list_positions(&self, story: &Story) -> Vec<u32> {
        let by_uuid: HashMap<Uuid, u32> = story
            .stage_nodes
            .iter()
            .enumerate()
            .map(|(position, node)| (node.uuid, position as u32))
            .collect();
        self.lists
            .iter()
            .flat_map(|list| {
                list.options
                    .iter()
                    .map(|option| by_uuid.get(option).copied().unwrap_or(0))
            })
            .collect()
    }

    /// The `ni` records: one per stage, with transitions resolved against
    /// the list-node index.
    pub fn stage_entries(&self, story: &Story) -> Vec<StageEntry> {
        let image_positions: HashMap<&str, i32> = self
            .images
            .iter()
            .map(|asset| (asset.name.as_str(), asset.position as i32))
            .collect();
        let lists_by_id: HashMap<Uuid, &ListNode> =
            self.lists.iter().map(|list| (list.id, list)).collect();
        let resolve = |transition: &Option<Transition>| -> Option<TransitionEntry> {
            let transition = transition.as_ref()?;
            let list = lists_by_id.get(&transition.action_node)?;
            Some(TransitionEntry {
                list_position: list.absolute_position as i32,
                option_count: list.options.len() as i32,
                option_index: transition.option_index,
            })
        };
        story
            .stage_nodes
            .iter()
            .enumerate()
            .map(|(position, node)| StageEntry {
                image_position: node
                    .image
                    .as_deref()
                    .and_then(|name| image_positions.get(name).copied())
                    .unwrap_or(-1),
                audio_position: position as i32,
                ok_transition: resolve(&node.ok_transition),
                home_transition: resolve(&node.home_transition),
                controls: ControlFlags {
                    wheel: node.control_settings.wheel,
                    ok: node.control_settings.ok,
                    home: node.control_settings.home,
                    pause: node.control_settings.pause,
                    autoplay: node.control_settings.autoplay,
                },
            })
            .collect()
    }
}
