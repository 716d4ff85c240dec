use log::{debug, warn};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Encoding, Object, ObjectId};
use std::collections::BTreeMap;

/// Kerning adjustment (thousandths of an em) past which a `TJ` gap reads as a space.
const TJ_SPACE_THRESHOLD: f32 = -200.0;

/// The first run of a text block together with its rendered font size.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub font_size: f32,
}

/// Plain text of one page plus the leading run of every text block on it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLayout {
    pub text: String,
    pub runs: Vec<TextRun>,
}

/// Text decoders for the fonts a page references, keyed by resource name.
///
/// Only fonts that declare a named `/Encoding` or carry a `/ToUnicode` map
/// get a decoder; strings shown in any other font are decoded byte-wise.
#[derive(Default)]
pub struct PageFonts<'a> {
    encodings: BTreeMap<Vec<u8>, Encoding<'a>>,
}

impl<'a> PageFonts<'a> {
    pub fn load(document: &'a Document, page_id: ObjectId) -> Self {
        let fonts = match document.get_page_fonts(page_id) {
            Ok(fonts) => fonts,
            Err(e) => {
                warn!("Could not read fonts of page {:?}: {}", page_id, e);
                return Self::default();
            }
        };

        let mut encodings = BTreeMap::new();
        for (name, font) in fonts {
            if let Some(encoding) = font_encoding(document, font) {
                encodings.insert(name, encoding);
            }
        }
        Self { encodings }
    }

    pub fn len(&self) -> usize {
        self.encodings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encodings.is_empty()
    }

    /// Decode a string operand shown in `font`.
    pub fn decode(&self, font: Option<&[u8]>, bytes: &[u8]) -> String {
        let decoded = font
            .and_then(|name| self.encodings.get(name))
            .and_then(|encoding| Document::decode_text(encoding, bytes).ok())
            .filter(|text| !text.is_empty() || bytes.is_empty());
        match decoded {
            Some(text) => expand_ligatures(&text),
            None => decode_pdf_string(bytes),
        }
    }
}

fn font_encoding<'a>(document: &'a Document, font: &'a Dictionary) -> Option<Encoding<'a>> {
    if !font.type_is(b"Font") {
        return None;
    }
    let named = font.get(b"Encoding").and_then(Object::as_name).is_ok();
    if !named && !font.has(b"ToUnicode") {
        return None;
    }
    match font.get_font_encoding(document) {
        Ok(encoding) => Some(encoding),
        Err(e) => {
            debug!("Falling back to byte-wise decoding for a font: {}", e);
            None
        }
    }
}

/// Lay out every page of a loaded document, in page order.
///
/// A page whose content stream cannot be decoded comes back empty rather
/// than failing the whole document.
pub fn extract_pages(document: &Document) -> Vec<PageLayout> {
    document
        .get_pages()
        .into_iter()
        .map(|(page_num, page_id)| {
            let decoded = document
                .get_page_content(page_id)
                .and_then(|raw| Content::decode(&raw));
            match decoded {
                Ok(content) => {
                    let fonts = PageFonts::load(document, page_id);
                    debug!("Page {} uses {} decodable fonts", page_num, fonts.len());
                    layout_page(&content.operations, &fonts)
                }
                Err(e) => {
                    warn!("Could not decode content of page {}: {}", page_num, e);
                    PageLayout::default()
                }
            }
        })
        .collect()
}

/// Run the text-showing operators of one page through a small text state
/// machine, decoding every string byte-wise.
pub fn layout_operations(operations: &[Operation]) -> PageLayout {
    layout_page(operations, &PageFonts::default())
}

/// Like [`layout_operations`], decoding strings with the page's fonts.
pub fn layout_page(operations: &[Operation], fonts: &PageFonts<'_>) -> PageLayout {
    let mut walker = PageWalker::new(fonts);
    for op in operations {
        walker.apply(op);
    }
    walker.finish()
}

enum RunState {
    Idle,
    Collecting { text: String, font_size: f32 },
    Done,
}

struct PageWalker<'f, 'a> {
    fonts: &'f PageFonts<'a>,
    font: Option<Vec<u8>>,
    text: String,
    runs: Vec<TextRun>,
    font_size: f32,
    matrix_scale: f32,
    baseline: Option<f32>,
    line_has_text: bool,
    run: RunState,
}

impl<'f, 'a> PageWalker<'f, 'a> {
    fn new(fonts: &'f PageFonts<'a>) -> Self {
        Self {
            fonts,
            font: None,
            text: String::new(),
            runs: Vec::new(),
            font_size: 0.0,
            matrix_scale: 1.0,
            baseline: None,
            line_has_text: false,
            run: RunState::Idle,
        }
    }

    fn decode(&self, bytes: &[u8]) -> String {
        self.fonts.decode(self.font.as_deref(), bytes)
    }

    fn effective_size(&self) -> f32 {
        self.font_size * self.matrix_scale
    }

    fn apply(&mut self, op: &Operation) {
        let operands = &op.operands;
        match op.operator.as_str() {
            "BT" => {
                self.matrix_scale = 1.0;
                self.baseline = None;
                self.run = RunState::Collecting {
                    text: String::new(),
                    font_size: self.effective_size(),
                };
            }
            "ET" => {
                self.break_line();
                self.close_run();
            }
            "Tf" => {
                self.font = operands
                    .first()
                    .and_then(|name| name.as_name().ok())
                    .map(<[u8]>::to_vec);
                if let Some(size) = operands.get(1).and_then(number) {
                    self.font_size = size;
                    self.on_size_change();
                }
            }
            "Tm" => {
                if operands.len() >= 6 {
                    let d = number(&operands[3]).unwrap_or(1.0);
                    let f = number(&operands[5]).unwrap_or(0.0);
                    let scale = if d.abs() > f32::EPSILON { d.abs() } else { 1.0 };
                    if self.baseline.is_some_and(|y| (y - f).abs() > f32::EPSILON) {
                        self.break_line();
                    }
                    self.baseline = Some(f);
                    if (scale - self.matrix_scale).abs() > f32::EPSILON {
                        self.matrix_scale = scale;
                        self.on_size_change();
                    }
                }
            }
            "Td" | "TD" => {
                let ty = operands.get(1).and_then(number).unwrap_or(0.0);
                if ty.abs() > f32::EPSILON {
                    self.break_line();
                }
            }
            "T*" => self.break_line(),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operands.first() {
                    let shown = self.decode(bytes);
                    self.show(&shown);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    self.show_array(items);
                }
            }
            "'" => {
                self.break_line();
                if let Some(Object::String(bytes, _)) = operands.first() {
                    let shown = self.decode(bytes);
                    self.show(&shown);
                }
            }
            "\"" => {
                self.break_line();
                if let Some(Object::String(bytes, _)) = operands.get(2) {
                    let shown = self.decode(bytes);
                    self.show(&shown);
                }
            }
            _ => {}
        }
    }

    fn show_array(&mut self, items: &[Object]) {
        let mut shown = String::new();
        for item in items {
            match item {
                Object::String(bytes, _) => shown.push_str(&self.decode(bytes)),
                other => {
                    if number(other).is_some_and(|adjust| adjust < TJ_SPACE_THRESHOLD) {
                        shown.push(' ');
                    }
                }
            }
        }
        self.show(&shown);
    }

    fn show(&mut self, s: &str) {
        if s.is_empty() {
            return;
        }
        self.text.push_str(s);
        self.line_has_text = true;
        let size = self.effective_size();
        if let RunState::Collecting { text, font_size } = &mut self.run {
            if text.is_empty() {
                *font_size = size;
            }
            text.push_str(s);
        }
    }

    fn on_size_change(&mut self) {
        let size = self.effective_size();
        let started = match &mut self.run {
            RunState::Collecting { text, font_size } => {
                if text.is_empty() {
                    *font_size = size;
                    false
                } else {
                    (*font_size - size).abs() > f32::EPSILON
                }
            }
            _ => false,
        };
        if started {
            self.close_run();
        }
    }

    fn break_line(&mut self) {
        if self.line_has_text {
            self.text.push('\n');
            self.line_has_text = false;
        }
        if matches!(&self.run, RunState::Collecting { text, .. } if !text.is_empty()) {
            self.close_run();
        }
    }

    fn close_run(&mut self) {
        match std::mem::replace(&mut self.run, RunState::Done) {
            RunState::Collecting { text, font_size } if !text.is_empty() => {
                self.runs.push(TextRun { text, font_size });
            }
            RunState::Collecting { .. } => {
                // Block ended before showing anything; nothing to record.
                self.run = RunState::Idle;
            }
            other => self.run = other,
        }
    }

    fn finish(mut self) -> PageLayout {
        if self.line_has_text {
            self.text.push('\n');
        }
        self.close_run();
        debug!("Laid out page with {} text runs", self.runs.len());
        PageLayout {
            text: self.text,
            runs: self.runs,
        }
    }
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// Decode a PDF string operand. UTF-16BE when it carries a byte-order mark,
/// otherwise one char per byte.
pub fn decode_pdf_string(bytes: &[u8]) -> String {
    let decoded: String = if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    };
    expand_ligatures(&decoded)
}

fn expand_ligatures(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\u{FB00}' => out.push_str("ff"),
            '\u{FB01}' => out.push_str("fi"),
            '\u{FB02}' => out.push_str("fl"),
            '\u{FB03}' => out.push_str("ffi"),
            '\u{FB04}' => out.push_str("ffl"),
            other => out.push(other),
        }
    }
    out
}
