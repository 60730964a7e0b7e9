//! Interviewer instructions handed to the realtime model.

use voxpoll_types::{SurveyDefinition, SurveyQuestion};

const PREAMBLE: &[&str] = &[
    "## Active Survey Definition (Do not deviate)",
    "너는 아래 설문 정의에 있는 질문만 순서대로 진행하는 인터뷰어다.",
    "중요:",
    "- 이미 답이 확정된 질문은 다시 묻지 마라. 답을 확인/요약했으면 즉시 다음 질문으로 이동한다.",
    "- 사용자가 옵션 중 하나를 언급하면(예: 관공서, 병원 등) 해당 질문에 대한 유효한 답변으로 간주한다.",
    "- 사용자가 질문과 다른 주제로 이야기하는 것은 허용된다. 먼저 공감/확인 1문장 후, 원래 질문으로 자연스럽게 돌아와라.",
    "- 비언어적/행동 신호(회피, 주제 전환, 조기 종료 등)로부터 가설을 세우는 것은 허용된다.",
    "  - 단, 가설은 결론이 아니다. 반드시 확인 질문으로 검증하고, 사용자가 부정하면 즉시 철회하라.",
    "- 사용자가 엉뚱한 답을 하면 1회만 부드럽게 재질문하고, 그래도 답이 없으면 다음으로 넘어가라.",
    "- 재질문이 필요할 때는 반드시 방금 질문한 동일 문항만 다시 묻고, 이전 질문으로 되돌아가지 마라.",
    "- 한 번에 질문 1개만 한다.",
    "- 답변을 유도할 때는 범주(예: 20분 안쪽/20~40/40~60/60+)를 제시해도 된다.",
    "- 응답자가 '여기까지'라고 하면 즉시 종료한다.",
    "질문 목록:",
];

const PROCEDURE: &[&str] = &[
    "",
    "진행 규칙:",
    "1) 다음 질문을 그대로 읽는다(의미 변경 금지).",
    "2) 응답이 나오면 짧게 한 번만 확인/요약하고 다음 질문으로 넘어간다.",
    "3) 응답이 질문과 무관하면: '아, 그렇군요. 제가 여쭤본 건 (질문 요지)였어요. 대충이라도 알려주실 수 있을까요?'로 1회만 재시도.",
    "4) 회피/머뭇거림이 보이면: '혹시 말씀하시기 좀 곤란하세요? 돈 때문인지, 거리 때문인지, 몸이 불편해서인지… 그중에 하나만 골라도 돼요.'처럼 선택지로 확인하라.",
];

fn question_line(q: &SurveyQuestion) -> String {
    let options = if q.options.is_empty() {
        String::new()
    } else {
        format!(" | options: {}", q.options.join(", "))
    };
    format!("- {} ({}): {}{}", q.id, q.question_type, q.text, options)
}

/// Renders the "Active Survey Definition" block for `definition`.
pub fn build_interview_addon(definition: &SurveyDefinition) -> String {
    PREAMBLE
        .iter()
        .map(|l| l.to_string())
        .chain(definition.questions.iter().map(question_line))
        .chain(PROCEDURE.iter().map(|l| l.to_string()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Base instructions, followed by a blank line and the addon when a
/// definition is active.
pub fn compose_system_prompt(base: &str, definition: Option<&SurveyDefinition>) -> String {
    match definition {
        Some(definition) => format!(
            "{}\n\n{}",
            base.trim_end(),
            build_interview_addon(definition)
        ),
        None => base.to_string(),
    }
}
