use serde::{Deserialize, Serialize};

/// Category tag of a knowledge record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum KnowledgeType {
    /// Complete protein analysis workflow
    ProteinWorkflow,
    /// Single reusable workflow step
    Fragment,
    /// Workflow from another domain (genomics, ...)
    OtherWorkflow,
    Custom(String),
}

impl KnowledgeType {
    pub fn as_str(&self) -> &str {
        match self {
            KnowledgeType::ProteinWorkflow => "protein_workflow",
            KnowledgeType::Fragment => "fragment",
            KnowledgeType::OtherWorkflow => "other_workflow",
            KnowledgeType::Custom(s) => s,
        }
    }
}

impl From<String> for KnowledgeType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "protein_workflow" => KnowledgeType::ProteinWorkflow,
            "fragment" => KnowledgeType::Fragment,
            "other_workflow" => KnowledgeType::OtherWorkflow,
            _ => KnowledgeType::Custom(s),
        }
    }
}

impl From<&str> for KnowledgeType {
    fn from(s: &str) -> Self {
        KnowledgeType::from(s.to_string())
    }
}

impl From<KnowledgeType> for String {
    fn from(kind: KnowledgeType) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for KnowledgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tagged workflow snippet, persisted as one element of the knowledge file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: KnowledgeType,
    #[serde(default)]
    pub tags: Vec<String>,
    pub content: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl KnowledgeRecord {
    pub fn new(id: u64, kind: impl Into<KnowledgeType>, tags: &[&str], content: &str) -> Self {
        Self {
            id,
            kind: kind.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            content: content.to_string(),
            embedding: None,
        }
    }

    /// Text submitted to the embedding provider: tags first, then content
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.tags.join(" "), self.content)
    }

    pub fn has_embedding_of(&self, dimension: usize) -> bool {
        matches!(&self.embedding, Some(e) if e.len() == dimension)
    }
}

/// Seed corpus written on first start
pub fn default_records() -> Vec<KnowledgeRecord> {
    vec![
        KnowledgeRecord::new(
            1,
            KnowledgeType::ProteinWorkflow,
            &["蛋白质", "结构预测", "3D可视化", "PDB"],
            "用户输入蛋白质序列（单条或多条）→ 验证序列有效性 → 调用 API 预测结构 → 展示 3D 结构、氨基酸分布和 Ramachandran 图 → 提供 PDB 文件下载",
        ),
        KnowledgeRecord::new(
            2,
            KnowledgeType::Fragment,
            &["验证", "序列有效性"],
            "序列有效性验证步骤：检查氨基酸字符是否有效，去除非法字符，验证序列长度",
        ),
        KnowledgeRecord::new(
            3,
            KnowledgeType::Fragment,
            &["API调用", "结构预测"],
            "使用AlphaFold2或RoseTTAFold API进行蛋白质结构预测",
        ),
        KnowledgeRecord::new(
            4,
            KnowledgeType::OtherWorkflow,
            &["基因分析", "序列比对"],
            "基因序列分析流程：输入DNA序列 → BLAST比对 → 基因注释 → 功能预测",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_round_trips_through_json() {
        let record = KnowledgeRecord::new(7, "alignment_tip", &["比对"], "使用 MAFFT");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(r#""type":"alignment_tip""#));
        assert!(json.contains(r#""embedding":null"#));

        let parsed: KnowledgeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind, KnowledgeType::Custom("alignment_tip".to_string()));
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_known_types_parse() {
        let json = r#"{"id":1,"type":"protein_workflow","tags":[],"content":"x"}"#;
        let parsed: KnowledgeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.kind, KnowledgeType::ProteinWorkflow);
        assert!(parsed.embedding.is_none());
    }

    #[test]
    fn test_default_records() {
        let records = default_records();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].kind, KnowledgeType::ProteinWorkflow);
        assert_eq!(records[3].kind, KnowledgeType::OtherWorkflow);
        assert!(records[0].embedding_text().starts_with("蛋白质 结构预测 3D可视化 PDB "));
    }

    #[test]
    fn test_has_embedding_of() {
        let mut record = KnowledgeRecord::new(1, KnowledgeType::Fragment, &[], "x");
        assert!(!record.has_embedding_of(3));
        record.embedding = Some(vec![0.0; 3]);
        assert!(record.has_embedding_of(3));
        assert!(!record.has_embedding_of(4));
    }
}
