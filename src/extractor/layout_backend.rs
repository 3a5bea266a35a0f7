use super::lopdf_backend::load_document;
use super::{decode_pdf_string, split_form_feeds, Attempt, ExtractionBackend, ExtractionInput};
use crate::config::LayoutParams;
use lopdf::content::{Content, Operation};
use lopdf::Object;
use std::cmp::Ordering;

/// 缺少字体宽度信息时，每个字符按 0.5 em 估算宽度
const AVG_GLYPH_WIDTH_EM: f32 = 0.5;

/// TJ 数组中超过 0.2 em 的右移视为词间空格
const TJ_SPACE_THRESHOLD: f32 = 200.0;

/// 版面分析后端
///
/// 直接解析页面内容流中的文本操作符，按坐标把文本片段重组为行和段落，
/// 间距容差由 `LayoutParams` 控制。每页之间插入换页符，再按换页符推断页边界。
#[derive(Debug, Clone)]
pub struct LayoutBackend {
    params: LayoutParams,
}

impl LayoutBackend {
    pub fn new(params: LayoutParams) -> Self {
        Self { params }
    }
}

impl Default for LayoutBackend {
    fn default() -> Self {
        Self::new(LayoutParams::default())
    }
}

impl ExtractionBackend for LayoutBackend {
    fn name(&self) -> &'static str {
        "layout"
    }

    fn attempt(&self, input: &ExtractionInput<'_>) -> Attempt {
        let document = match load_document(input.bytes, "") {
            Ok(document) => document,
            Err(e) => return Attempt::Failed(e),
        };

        let pages = document.get_pages();
        if pages.is_empty() {
            return Attempt::Failed("document has no pages".to_string());
        }

        let mut page_texts = Vec::with_capacity(pages.len());
        for page_id in pages.values() {
            let runs = document
                .get_page_content(*page_id)
                .ok()
                .and_then(|bytes| Content::decode(&bytes).ok())
                .map(|content| collect_runs(&content.operations))
                .unwrap_or_default();
            page_texts.push(lay_out(runs, &self.params));
        }

        // 每页以换页符结束，最后一页是空白页时也能保留下来
        let terminated: String = page_texts.iter().map(|text| format!("{}\x0C", text)).collect();
        Attempt::Pages(split_form_feeds(&terminated))
    }
}

/// 一段定位后的文本
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GlyphRun {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub width: f32,
}

/// 文本状态：文本矩阵、行矩阵、字号和行距
#[derive(Debug, Clone, Copy)]
struct TextState {
    matrix: [f32; 6],
    line_matrix: [f32; 6],
    font_size: f32,
    leading: f32,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            matrix: IDENTITY,
            line_matrix: IDENTITY,
            font_size: 12.0,
            leading: 0.0,
        }
    }
}

const IDENTITY: [f32; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

impl TextState {
    fn begin_text(&mut self) {
        self.matrix = IDENTITY;
        self.line_matrix = IDENTITY;
    }

    fn set_matrix(&mut self, m: [f32; 6]) {
        self.matrix = m;
        self.line_matrix = m;
    }

    /// Td：相对行矩阵平移
    fn move_line(&mut self, tx: f32, ty: f32) {
        let [a, b, c, d, e, f] = self.line_matrix;
        self.line_matrix = [a, b, c, d, e + tx * a + ty * c, f + tx * b + ty * d];
        self.matrix = self.line_matrix;
    }

    /// T*
    fn next_line(&mut self) {
        let leading = if self.leading > 0.0 { self.leading } else { self.font_size * 1.2 };
        self.move_line(0.0, -leading);
    }

    fn scale(&self) -> f32 {
        let [_, _, c, d, _, _] = self.matrix;
        let scale = c.hypot(d);
        if scale > 0.0 {
            scale
        } else {
            1.0
        }
    }

    /// 文本空间中水平前进
    fn advance(&mut self, tx: f32) {
        let [a, b, c, d, e, f] = self.matrix;
        self.matrix = [a, b, c, d, e + tx * a, f + tx * b];
    }

    /// 放置一段文本，返回片段并把文本矩阵移到其末尾
    fn place(&mut self, text: String) -> Option<GlyphRun> {
        let advance = text.chars().count() as f32 * self.font_size * AVG_GLYPH_WIDTH_EM;
        let run = GlyphRun {
            x: self.matrix[4],
            y: self.matrix[5],
            size: self.font_size * self.scale(),
            width: advance * self.matrix[0].abs().max(f32::EPSILON),
            text,
        };
        self.advance(advance);
        if run.text.trim().is_empty() {
            None
        } else {
            Some(run)
        }
    }
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn numbers<const N: usize>(operands: &[Object]) -> Option<[f32; N]> {
    if operands.len() < N {
        return None;
    }
    let mut out = [0.0; N];
    for (slot, operand) in out.iter_mut().zip(operands) {
        *slot = number(operand)?;
    }
    Some(out)
}

/// 把 TJ 数组合并为一段文本，较大的负位移插入空格
fn combine_tj(items: &[Object], state: &TextState) -> (String, f32) {
    let mut text = String::new();
    let mut shift = 0.0;
    for item in items {
        match item {
            Object::String(bytes, _) => text.push_str(&decode_pdf_string(bytes)),
            other => {
                if let Some(adjustment) = number(other) {
                    shift -= adjustment / 1000.0 * state.font_size;
                    if -adjustment > TJ_SPACE_THRESHOLD && !text.is_empty() && !text.ends_with(' ') {
                        text.push(' ');
                    }
                }
            }
        }
    }
    (text, shift)
}

/// 从内容流操作中收集文本片段
pub(crate) fn collect_runs(operations: &[Operation]) -> Vec<GlyphRun> {
    let mut runs = Vec::new();
    let mut state = TextState::default();
    let mut in_text = false;

    for op in operations {
        let operands = &op.operands;
        match op.operator.as_str() {
            "BT" => {
                in_text = true;
                state.begin_text();
            }
            "ET" => in_text = false,
            "Tf" => {
                if let Some(size) = operands.get(1).and_then(number) {
                    state.font_size = size.abs();
                }
            }
            "TL" => {
                if let Some([leading]) = numbers::<1>(operands) {
                    state.leading = leading;
                }
            }
            "Td" => {
                if let Some([tx, ty]) = numbers::<2>(operands) {
                    state.move_line(tx, ty);
                }
            }
            "TD" => {
                if let Some([tx, ty]) = numbers::<2>(operands) {
                    state.leading = -ty;
                    state.move_line(tx, ty);
                }
            }
            "Tm" => {
                if let Some(m) = numbers::<6>(operands) {
                    state.set_matrix(m);
                }
            }
            "T*" => state.next_line(),
            "Tj" | "'" | "\"" if in_text => {
                if op.operator != "Tj" {
                    state.next_line();
                }
                let index = if op.operator == "\"" { 2 } else { 0 };
                if let Some(Object::String(bytes, _)) = operands.get(index) {
                    if let Some(run) = state.place(decode_pdf_string(bytes)) {
                        runs.push(run);
                    }
                }
            }
            "TJ" if in_text => {
                if let Some(Object::Array(items)) = operands.first() {
                    let (text, shift) = combine_tj(items, &state);
                    if let Some(mut run) = state.place(text) {
                        run.width += shift;
                        runs.push(run);
                    }
                    state.advance(shift);
                }
            }
            _ => {}
        }
    }

    runs
}

fn by_reading_order(a: &GlyphRun, b: &GlyphRun) -> Ordering {
    b.y.partial_cmp(&a.y)
        .unwrap_or(Ordering::Equal)
        .then(a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal))
}

/// 把文本片段重组为页面文本
///
/// - 基线相差不超过半个字号的片段归为同一行，行内按 x 排序
/// - 行内间距超过 `word_margin` 个字号插入空格，超过 `char_margin` 个字号视为另一个文本框（换行）
/// - 行间空白超过 `line_margin` 个字号插入空行（段落分隔）
pub(crate) fn lay_out(mut runs: Vec<GlyphRun>, params: &LayoutParams) -> String {
    if runs.is_empty() {
        return String::new();
    }
    runs.sort_by(by_reading_order);

    // 1. 分行
    let mut lines: Vec<Vec<GlyphRun>> = Vec::new();
    for run in runs {
        match lines.last_mut() {
            Some(line) if (line[0].y - run.y).abs() <= line[0].size.max(run.size) * 0.5 => line.push(run),
            _ => lines.push(vec![run]),
        }
    }

    // 2. 行内拼接，行间判断段落
    let mut out = String::new();
    let mut previous: Option<(f32, f32)> = None;

    for mut line in lines {
        line.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal));
        let baseline = line[0].y;
        let size = line.iter().map(|r| r.size).fold(0.0_f32, f32::max);

        if let Some((prev_baseline, prev_size)) = previous {
            let gap = prev_baseline - baseline - prev_size.max(size);
            if gap > params.line_margin * size {
                out.push_str("\n\n");
            } else {
                out.push('\n');
            }
        }

        let mut end: Option<f32> = None;
        for run in &line {
            if let Some(prev_end) = end {
                let gap = run.x - prev_end;
                if gap > params.char_margin * size {
                    out.push('\n');
                } else if gap > params.word_margin * size && !out.ends_with(' ') && !run.text.starts_with(' ') {
                    out.push(' ');
                }
            }
            out.push_str(&run.text);
            end = Some(run.x + run.width);
        }

        previous = Some((baseline, size));
    }

    out
}
