//! Policy report generation, caching and export.
//!
//! [`ReportService::report`] asks the language model for a narrative over a
//! stored session and caches the result per session id.
//! [`ReportService::export`] renders that report, plus lazily produced
//! [`ReportAssets`], through a [`DocumentRenderer`]. Re-extraction calls
//! [`ReportCache::invalidate`] so the next request regenerates both.

use async_trait::async_trait;
use chrono::{Datelike, Local};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use voxpoll_db::DbPool;
use voxpoll_types::{AnswerMap, TranscriptItem, TranscriptRole};

use crate::error::SurveyError;
use crate::extractor::{CompletionRequest, ExtractionModel};
use crate::store;

pub const REPORT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_REPORT_TITLE: &str = "설문 결과 보고서";
const DEFAULT_SURVEY_NAME: &str = "설문조사";
/// Answered entries considered for the chart.
const CHART_MAX_ENTRIES: usize = 12;

const REPORT_SYSTEM_PROMPT: &str = r#"당신은 정책 연구원입니다. 제공된 설문 인터뷰 데이터를 분석하여 전문적인 정책보고서를 작성해주세요.
보고서는 다음 JSON 형식으로 작성하세요:
{
  "title": "보고서 제목 (설문 주제 기반)",
  "subtitle": "부제목",
  "executiveSummary": "요약문 (3-5문장)",
  "sections": [
    {
      "title": "섹션 제목",
      "content": "섹션 내용 (마크다운 없이 평문, 3-5문장)"
    }
  ],
  "keyFindings": ["핵심 발견 1", "핵심 발견 2", ...],
  "recommendations": ["정책 제언 1", "정책 제언 2", ...]
}

sections는 다음 항목을 포함하세요:
1. 조사 개요
2. 응답자 특성
3. 주요 현황 분석
4. 문제점 및 불편사항
5. 개선 수요 분석

keyFindings는 3-5개, recommendations는 3-5개로 작성하세요.
모든 내용은 한국어로 작성하고, 정책보고서 형식에 맞는 공식적인 문체를 사용하세요."#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyReport {
    pub title: String,
    pub subtitle: String,
    pub date: String,
    pub respondent_id: String,
    pub session_id: String,
    pub executive_summary: String,
    pub sections: Vec<ReportSection>,
    pub key_findings: Vec<String>,
    pub recommendations: Vec<String>,
    pub raw_answers: AnswerMap,
}

/// Chart input derived from a report's answers. Drawing is left to the
/// renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChartData {
    /// Mostly numeric answers: one bar per question. Non-numeric values plot
    /// as zero. `confidence` holds percentages where the model gave one.
    Bar {
        labels: Vec<String>,
        values: Vec<f64>,
        confidence: Vec<Option<u32>>,
    },
    /// Mostly categorical answers: how often each value occurs.
    Doughnut { counts: BTreeMap<String, u32> },
}

/// Binary and derived material attached to an export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportAssets {
    pub chart: Option<ChartData>,
    pub image: Option<Vec<u8>>,
}

/// Per-session storage for generated reports and their assets.
#[async_trait]
pub trait ReportCache: Send + Sync {
    async fn get(&self, session_id: &str) -> Option<PolicyReport>;
    async fn set(&self, session_id: &str, report: PolicyReport);
    /// Drops both the report and its assets.
    async fn invalidate(&self, session_id: &str);
    async fn get_assets(&self, session_id: &str) -> Option<ReportAssets>;
    async fn set_assets(&self, session_id: &str, assets: ReportAssets);
}

/// Process-local [`ReportCache`]. Writes are last-writer-wins.
#[derive(Debug, Default)]
pub struct InMemoryReportCache {
    reports: Mutex<HashMap<String, PolicyReport>>,
    assets: Mutex<HashMap<String, ReportAssets>>,
}

impl InMemoryReportCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportCache for InMemoryReportCache {
    async fn get(&self, session_id: &str) -> Option<PolicyReport> {
        let reports = self.reports.lock().unwrap_or_else(|e| e.into_inner());
        reports.get(session_id).cloned()
    }

    async fn set(&self, session_id: &str, report: PolicyReport) {
        let mut reports = self.reports.lock().unwrap_or_else(|e| e.into_inner());
        reports.insert(session_id.to_string(), report);
    }

    async fn invalidate(&self, session_id: &str) {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        self.assets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
    }

    async fn get_assets(&self, session_id: &str) -> Option<ReportAssets> {
        let assets = self.assets.lock().unwrap_or_else(|e| e.into_inner());
        assets.get(session_id).cloned()
    }

    async fn set_assets(&self, session_id: &str, assets: ReportAssets) {
        let mut map = self.assets.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(session_id.to_string(), assets);
    }
}

/// Produces the assets for an export. Failures degrade to missing assets.
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn produce(&self, report: &PolicyReport) -> ReportAssets;
}

/// Derives [`ChartData`] from the answers; produces no image.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnswerChartSource;

#[async_trait]
impl AssetSource for AnswerChartSource {
    async fn produce(&self, report: &PolicyReport) -> ReportAssets {
        ReportAssets {
            chart: chart_data(&report.raw_answers),
            image: None,
        }
    }
}

/// Picks a bar chart when at least half of the first answered entries are
/// numeric, a value-count doughnut otherwise.
pub fn chart_data(answers: &AnswerMap) -> Option<ChartData> {
    let entries: Vec<_> = answers
        .iter()
        .filter(|(_, record)| record.is_answered())
        .take(CHART_MAX_ENTRIES)
        .collect();
    if entries.is_empty() {
        return None;
    }

    let numeric = entries.iter().filter(|(_, r)| r.value.is_number()).count();
    if numeric * 2 >= entries.len() {
        return Some(ChartData::Bar {
            labels: entries.iter().map(|(id, _)| id.to_string()).collect(),
            values: entries
                .iter()
                .map(|(_, r)| r.value.as_f64().unwrap_or(0.0))
                .collect(),
            confidence: entries
                .iter()
                .map(|(_, r)| r.confidence.map(|c| (c * 100.0).round().max(0.0) as u32))
                .collect(),
        });
    }

    let mut counts = BTreeMap::new();
    for (_, record) in entries {
        let label = match &record.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        *counts.entry(label).or_insert(0) += 1;
    }
    Some(ChartData::Doughnut { counts })
}

/// Turns a report into document bytes.
pub trait DocumentRenderer: Send + Sync {
    fn content_type(&self) -> &'static str;
    fn extension(&self) -> &'static str;
    fn render(&self, report: &PolicyReport, assets: &ReportAssets) -> Result<Vec<u8>, SurveyError>;
}

/// UTF-8 plain-text rendering.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextRenderer;

impl DocumentRenderer for PlainTextRenderer {
    fn content_type(&self) -> &'static str {
        "text/plain; charset=utf-8"
    }

    fn extension(&self) -> &'static str {
        "txt"
    }

    fn render(&self, report: &PolicyReport, assets: &ReportAssets) -> Result<Vec<u8>, SurveyError> {
        let mut out = String::new();
        out.push_str(&format!("{}\n{}\n{}\n\n", report.title, report.subtitle, report.date));

        if !report.executive_summary.is_empty() {
            out.push_str(&format!("요약\n{}\n\n", report.executive_summary));
        }

        for (i, section) in report.sections.iter().enumerate() {
            out.push_str(&format!("{}. {}\n{}\n\n", i + 1, section.title, section.content));
        }

        for (heading, items) in [
            ("핵심 발견", &report.key_findings),
            ("정책 제언", &report.recommendations),
        ] {
            if items.is_empty() {
                continue;
            }
            out.push_str(heading);
            out.push('\n');
            for item in items {
                out.push_str(&format!("- {item}\n"));
            }
            out.push('\n');
        }

        match &assets.chart {
            Some(ChartData::Bar { labels, values, .. }) => {
                out.push_str("응답 분포\n");
                for (label, value) in labels.iter().zip(values) {
                    out.push_str(&format!("{label}: {value}\n"));
                }
                out.push('\n');
            }
            Some(ChartData::Doughnut { counts }) => {
                out.push_str("응답 분포\n");
                for (label, count) in counts {
                    out.push_str(&format!("{label}: {count}\n"));
                }
                out.push('\n');
            }
            None => {}
        }

        out.push_str("응답 원자료\n");
        out.push_str(&serde_json::to_string_pretty(&report.raw_answers)?);
        out.push('\n');
        Ok(out.into_bytes())
    }
}

/// A rendered export ready to be served as an attachment.
#[derive(Debug, Clone)]
pub struct ExportedDocument {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

pub struct ReportService {
    pool: DbPool,
    model: Arc<dyn ExtractionModel>,
    cache: Arc<dyn ReportCache>,
    assets: Arc<dyn AssetSource>,
    renderer: Arc<dyn DocumentRenderer>,
}

impl ReportService {
    pub fn new(pool: DbPool, model: Arc<dyn ExtractionModel>, cache: Arc<dyn ReportCache>) -> Self {
        Self {
            pool,
            model,
            cache,
            assets: Arc::new(AnswerChartSource),
            renderer: Arc::new(PlainTextRenderer),
        }
    }

    pub fn with_assets(mut self, assets: Arc<dyn AssetSource>) -> Self {
        self.assets = assets;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn cache(&self) -> &Arc<dyn ReportCache> {
        &self.cache
    }

    /// Returns the cached report for `session_id`, generating it on a miss.
    pub async fn report(&self, session_id: &str) -> Result<PolicyReport, SurveyError> {
        if let Some(cached) = self.cache.get(session_id).await {
            tracing::debug!(session_id, "report cache hit");
            return Ok(cached);
        }

        let pool = self.pool.clone();
        let id = session_id.to_string();
        let (session, answers, survey_name) = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            let session = store::get_session(&conn, &id)?.ok_or(SurveyError::SessionNotFound)?;
            let answers = store::get_response(&conn, &id)?
                .map(|r| r.answers)
                .unwrap_or_default();
            let name = store::get_definition(&conn, &session.definition_id)?.and_then(|d| d.name);
            Ok::<_, SurveyError>((session, answers, name))
        })
        .await??;

        let request = CompletionRequest {
            system: REPORT_SYSTEM_PROMPT.to_string(),
            user: report_user_content(
                survey_name.as_deref(),
                &session.respondent_id,
                &session.transcript,
                &answers,
            )?,
            temperature: REPORT_TEMPERATURE,
            json_mode: true,
        };
        let raw = self.model.complete(&request).await?;
        let parsed: Value = serde_json::from_str(&raw).unwrap_or_else(|err| {
            tracing::warn!(session_id, error = %err, "report content was not valid JSON");
            json!({})
        });

        let report = build_report(&parsed, &session.id, &session.respondent_id, answers, today());
        self.cache.set(session_id, report.clone()).await;
        tracing::info!(session_id, sections = report.sections.len(), "report generated");
        Ok(report)
    }

    /// Renders the report for `session_id` as a downloadable document.
    pub async fn export(&self, session_id: &str) -> Result<ExportedDocument, SurveyError> {
        let report = self.report(session_id).await?;

        let assets = match self.cache.get_assets(session_id).await {
            Some(assets) => assets,
            None => {
                let assets = self.assets.produce(&report).await;
                self.cache.set_assets(session_id, assets.clone()).await;
                assets
            }
        };

        let bytes = self.renderer.render(&report, &assets)?;
        let tail: String = {
            let chars: Vec<char> = session_id.chars().collect();
            chars[chars.len().saturating_sub(6)..].iter().collect()
        };
        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S");
        let filename = format!(
            "정책보고서_{}_{}_{}.{}",
            report.respondent_id,
            tail,
            stamp,
            self.renderer.extension()
        );

        Ok(ExportedDocument {
            filename,
            content_type: self.renderer.content_type(),
            bytes,
        })
    }
}

fn today() -> String {
    let now = Local::now();
    format!("{}년 {}월 {}일", now.year(), now.month(), now.day())
}

fn report_user_content(
    survey_name: Option<&str>,
    respondent_id: &str,
    transcript: &[TranscriptItem],
    answers: &AnswerMap,
) -> Result<String, SurveyError> {
    let lines: Vec<String> = transcript
        .iter()
        .filter(|t| !t.text.trim().is_empty())
        .map(|t| {
            let speaker = match t.role {
                TranscriptRole::Assistant => "진행자",
                TranscriptRole::User => "응답자",
            };
            format!("[{speaker}] {}", t.text)
        })
        .collect();

    Ok(serde_json::to_string_pretty(&json!({
        "surveyName": survey_name.filter(|n| !n.is_empty()).unwrap_or(DEFAULT_SURVEY_NAME),
        "respondentId": respondent_id,
        "transcript": lines,
        "extractedAnswers": answers,
    }))?)
}

/// Applies defaults to whatever the model returned.
fn build_report(
    parsed: &Value,
    session_id: &str,
    respondent_id: &str,
    answers: AnswerMap,
    date: String,
) -> PolicyReport {
    let text = |key: &str| {
        parsed
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let list = |key: &str| -> Vec<String> {
        parsed
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    };

    let sections = parsed
        .get("sections")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .map(|s| ReportSection {
                    title: s.get("title").and_then(Value::as_str).unwrap_or_default().to_string(),
                    content: s.get("content").and_then(Value::as_str).unwrap_or_default().to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    PolicyReport {
        title: text("title").unwrap_or_else(|| DEFAULT_REPORT_TITLE.to_string()),
        subtitle: text("subtitle").unwrap_or_else(|| format!("응답자: {respondent_id}")),
        date,
        respondent_id: respondent_id.to_string(),
        session_id: session_id.to_string(),
        executive_summary: text("executiveSummary").unwrap_or_default(),
        sections,
        key_findings: list("keyFindings"),
        recommendations: list("recommendations"),
        raw_answers: answers,
    }
}
