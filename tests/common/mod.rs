#![allow(dead_code)]

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use papersum::summary::budget::{TokenBudget, TokenCounter};
use papersum::summary::client::{ChatCompletion, ChatError, ChatMessage, ChatProvider, Role, Usage};

/// Build a PDF where every `(font size, text)` pair is its own text block on
/// its own line.
pub fn build_pdf(pages: &[Vec<(i64, &str)>]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for page in pages {
        let mut operations = Vec::new();
        let mut y = 760;
        for (size, text) in page {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), (*size).into()]));
            operations.push(Operation::new("Td", vec![72.into(), y.into()]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(*text)]));
            operations.push(Operation::new("ET", vec![]));
            y -= 20;
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => count,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// The one-page document holding only an abstract.
pub fn abstract_only_pdf() -> Vec<u8> {
    build_pdf(&[vec![(10, "Abstract"), (10, "This is a test abstract.")]])
}

/// Three pages: title, abstract and introduction, methods, conclusion.
pub fn three_page_pdf() -> Vec<u8> {
    build_pdf(&[
        vec![
            (20, "Title Line One"),
            (20, "Title Line Two"),
            (10, "Abstract"),
            (10, "We propose x."),
            (10, "Introduction"),
            (10, "Intro text."),
        ],
        vec![(10, "More intro."), (10, "Methods"), (10, "Our method.")],
        vec![(10, "Conclusion"), (10, "We conclude.")],
    ])
}

const IDENTITY_UCS_CMAP: &str = "/CIDInit /ProcSet findresource begin
12 dict begin
begincmap
/CIDSystemInfo
<< /Registry (Adobe)
/Ordering (UCS)
/Supplement 0
>> def
/CMapName /Adobe-Identity-UCS def
/CMapType 2 def
1 begincodespacerange
<0000> <FFFF>
endcodespacerange
1 beginbfrange
<0000> <005E> <0020>
endbfrange
endcmap
CMapName currentdict /CMap defineresource pop
end
end
";

/// Two-byte glyph ids as a subset Identity-H font emits them: `char - 0x20`.
fn glyph_ids(text: &str) -> Vec<u8> {
    text.bytes()
        .flat_map(|b| u16::from(b - 0x20).to_be_bytes())
        .collect()
}

/// One page of ASCII lines shown through a Type0 Identity-H font whose
/// `/ToUnicode` CMap is the only way back to readable text.
pub fn identity_h_pdf(lines: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let cmap_id = doc.add_object(Stream::new(dictionary! {}, IDENTITY_UCS_CMAP.as_bytes().to_vec()));
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => "ABCDEF+Subset",
        "Encoding" => "Identity-H",
        "ToUnicode" => cmap_id,
    });

    let mut operations = Vec::new();
    let mut y = 760;
    for line in lines {
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new("Tf", vec!["F0".into(), 10.into()]));
        operations.push(Operation::new("Td", vec![72.into(), y.into()]));
        operations.push(Operation::new(
            "Tj",
            vec![Object::String(glyph_ids(line), StringFormat::Hexadecimal)],
        ));
        operations.push(Operation::new("ET", vec![]));
        y -= 20;
    }
    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! {
            "Font" => dictionary! { "F0" => font_id },
        },
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// One token per character, so clip lengths are easy to predict.
pub struct CharCounter;

impl TokenCounter for CharCounter {
    fn count(&self, text: &str) -> usize {
        text.chars().count()
    }
}

pub fn char_budget(max_tokens: usize) -> TokenBudget {
    TokenBudget::with_max_tokens(Arc::new(CharCounter), max_tokens)
}

pub fn test_keys(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("sk-test-key-{:0>16}", i)).collect()
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub api_key: String,
    pub messages: Vec<ChatMessage>,
}

impl RecordedCall {
    pub fn assistant(&self) -> &str {
        self.messages
            .iter()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

type Script = dyn Fn(usize, &[ChatMessage]) -> Result<String, ChatError> + Send + Sync;

/// Provider that records every call and answers from a script.
pub struct ScriptedProvider {
    calls: Mutex<Vec<RecordedCall>>,
    script: Box<Script>,
}

impl ScriptedProvider {
    pub fn new<F>(script: F) -> Arc<Self>
    where
        F: Fn(usize, &[ChatMessage]) -> Result<String, ChatError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            script: Box::new(script),
        })
    }

    /// Always answer with a summary-shaped text.
    pub fn echo() -> Arc<Self> {
        Self::new(|i, _| Ok(format!("  1. Title: Scripted Title  \n  answer {}  ", i)))
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn complete(&self, api_key: &str, messages: &[ChatMessage]) -> Result<ChatCompletion, ChatError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(RecordedCall {
                api_key: api_key.to_string(),
                messages: messages.to_vec(),
            });
            calls.len() - 1
        };
        let text = (self.script)(index, messages)?;
        Ok(ChatCompletion {
            text,
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
            elapsed: Duration::from_millis(1),
        })
    }
}
