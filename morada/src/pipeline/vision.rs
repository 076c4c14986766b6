//! Vision client: the three vision-backed calls the pipeline makes.
//!
//! Prompts and model choice live behind this trait; the pipeline only depends
//! on the call shapes. [`LlmVision`] drives a chat model and parses JSON;
//! [`FixedVision`] is a deterministic stand-in for tests and offline runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::AgentError;
use crate::llm::LlmClient;
use crate::message::Message;
use crate::store::CostItem;

use super::state::{
    ROOM_BATHROOM, ROOM_BEDROOM, ROOM_EXTERIOR, ROOM_FLOOR_PLAN, ROOM_HALL, ROOM_KITCHEN,
    ROOM_LIVING,
};

/// Condition and costs for one room, before it becomes a [`RoomEstimate`](super::state::RoomEstimate).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoomEstimateDraft {
    pub condition: String,
    #[serde(default)]
    pub items: Vec<CostItem>,
    pub cost_min: i64,
    pub cost_max: i64,
    pub confidence: f64,
}

/// The three vision-backed calls.
#[async_trait]
pub trait VisionClient: Send + Sync {
    /// Fast classifier for one untagged image: `(room_type, confidence)`.
    async fn classify_room(&self, image_url: &str) -> Result<(String, f64), AgentError>;

    /// One batched call clustering multi-instance room types by visual
    /// similarity. Input: type → image urls; output: type → 1-based instance
    /// index per image, same order.
    async fn group_rooms(
        &self,
        groups: &BTreeMap<String, Vec<String>>,
    ) -> Result<BTreeMap<String, Vec<u32>>, AgentError>;

    /// Condition and renovation cost estimate for one room.
    async fn estimate_room(
        &self,
        room_key: &str,
        room_type: &str,
        image_urls: &[String],
    ) -> Result<RoomEstimateDraft, AgentError>;
}

/// Deterministic vision stand-in: classifies by URL keywords, never splits
/// instances, and estimates from a fixed table.
pub struct FixedVision;

pub(crate) fn type_from_keywords(text: &str) -> (String, f64) {
    let lower = text.to_lowercase();
    let table = [
        ("cozinha", ROOM_KITCHEN),
        ("kitchen", ROOM_KITCHEN),
        ("quarto", ROOM_BEDROOM),
        ("bedroom", ROOM_BEDROOM),
        ("banho", ROOM_BATHROOM),
        ("wc", ROOM_BATHROOM),
        ("sala", ROOM_LIVING),
        ("living", ROOM_LIVING),
        ("planta", ROOM_FLOOR_PLAN),
        ("plan", ROOM_FLOOR_PLAN),
        ("corredor", ROOM_HALL),
        ("varanda", ROOM_EXTERIOR),
        ("fachada", ROOM_EXTERIOR),
        ("exterior", ROOM_EXTERIOR),
    ];
    for (needle, room_type) in table {
        if lower.contains(needle) {
            return (room_type.to_string(), 0.9);
        }
    }
    (ROOM_LIVING.to_string(), 0.5)
}

/// Conservative fixed estimate per room type; also the estimate-stage
/// fallback (confidence 0.3) when a vision call fails.
pub fn fallback_estimate(room_type: &str) -> RoomEstimateDraft {
    let (cost_min, cost_max) = match room_type {
        ROOM_KITCHEN => (4_000, 9_000),
        ROOM_BATHROOM => (2_500, 6_000),
        ROOM_BEDROOM => (1_000, 3_000),
        ROOM_LIVING => (1_500, 4_000),
        ROOM_EXTERIOR => (500, 2_000),
        ROOM_HALL => (500, 1_500),
        _ => (1_000, 3_000),
    };
    RoomEstimateDraft {
        condition: "estado desconhecido".to_string(),
        items: vec![],
        cost_min,
        cost_max,
        confidence: 0.3,
    }
}

#[async_trait]
impl VisionClient for FixedVision {
    async fn classify_room(&self, image_url: &str) -> Result<(String, f64), AgentError> {
        Ok(type_from_keywords(image_url))
    }

    async fn group_rooms(
        &self,
        groups: &BTreeMap<String, Vec<String>>,
    ) -> Result<BTreeMap<String, Vec<u32>>, AgentError> {
        // Never split: every image of a type lands in instance 1.
        Ok(groups
            .iter()
            .map(|(t, urls)| (t.clone(), vec![1; urls.len()]))
            .collect())
    }

    async fn estimate_room(
        &self,
        _room_key: &str,
        room_type: &str,
        _image_urls: &[String],
    ) -> Result<RoomEstimateDraft, AgentError> {
        let mut draft = fallback_estimate(room_type);
        draft.condition = "usado, a precisar de atualização".to_string();
        draft.confidence = 0.8;
        Ok(draft)
    }
}

/// Vision calls driven through a chat model; replies must be JSON.
pub struct LlmVision {
    llm: Arc<dyn LlmClient>,
}

impl LlmVision {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    async fn ask_json<T: serde::de::DeserializeOwned>(
        &self,
        system: &str,
        user: String,
    ) -> Result<T, AgentError> {
        let response = self
            .llm
            .invoke(&[Message::persona(system), Message::user(user)])
            .await?;
        let text = response.content.trim();
        let json_text = text
            .strip_prefix("```json")
            .or_else(|| text.strip_prefix("```"))
            .map(|t| t.trim_end_matches("```").trim())
            .unwrap_or(text);
        serde_json::from_str(json_text)
            .map_err(|e| AgentError::Llm(format!("vision reply was not valid JSON: {}", e)))
    }
}

#[derive(Deserialize)]
struct ClassifyReply {
    room_type: String,
    confidence: f64,
}

#[derive(Deserialize)]
struct GroupReply {
    groups: BTreeMap<String, Vec<u32>>,
}

#[async_trait]
impl VisionClient for LlmVision {
    async fn classify_room(&self, image_url: &str) -> Result<(String, f64), AgentError> {
        let reply: ClassifyReply = self
            .ask_json(
                "Classifica a divisão mostrada na imagem. Responde só com JSON \
                 {\"room_type\": \"cozinha|sala|quarto|casa_de_banho|exterior|corredor|planta\", \
                 \"confidence\": 0.0-1.0}.",
                format!("Imagem: {}", image_url),
            )
            .await?;
        Ok((reply.room_type, reply.confidence))
    }

    async fn group_rooms(
        &self,
        groups: &BTreeMap<String, Vec<String>>,
    ) -> Result<BTreeMap<String, Vec<u32>>, AgentError> {
        let listing = groups
            .iter()
            .map(|(t, urls)| format!("{}: {}", t, urls.join(", ")))
            .collect::<Vec<_>>()
            .join("\n");
        let reply: GroupReply = self
            .ask_json(
                "Agrupa imagens da mesma divisão física. Para cada tipo devolve um índice \
                 1-based por imagem, pela mesma ordem. Na dúvida junta no mesmo grupo. \
                 Responde só com JSON {\"groups\": {\"quarto\": [1, 1, 2], ...}}.",
                listing,
            )
            .await?;
        Ok(reply.groups)
    }

    async fn estimate_room(
        &self,
        room_key: &str,
        room_type: &str,
        image_urls: &[String],
    ) -> Result<RoomEstimateDraft, AgentError> {
        self.ask_json(
            "És um orçamentista de obras em Portugal. Avalia o estado da divisão e estima \
             custos de renovação em euros. Responde só com JSON {\"condition\": \"...\", \
             \"items\": [{\"label\": \"...\", \"cost_min\": 0, \"cost_max\": 0}], \
             \"cost_min\": 0, \"cost_max\": 0, \"confidence\": 0.0-1.0}.",
            format!(
                "Divisão {} (tipo {}). Imagens:\n{}",
                room_key,
                room_type,
                image_urls.join("\n")
            ),
        )
        .await
    }
}
