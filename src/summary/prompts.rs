//! Message templates for the three summary stages.

use std::fmt;
use std::str::FromStr;

use crate::summary::client::{ChatMessage, Role};

/// Language the model is asked to answer in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Language {
    #[default]
    English,
    Chinese,
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Language::English),
            "zh" | "chinese" => Ok(Language::Chinese),
            other => Err(format!("unsupported language '{other}', expected 'en' or 'zh'")),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::English => write!(f, "English"),
            Language::Chinese => write!(f, "Chinese"),
        }
    }
}

pub fn summary_messages(key_words: &str, language: Language, clipped: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::new(
            Role::System,
            format!(
                "You are a researcher in the field of [{key_words}] who writes short, precise paper summaries"
            ),
        ),
        ChatMessage::new(
            Role::Assistant,
            format!(
                "Below are the title, authors, link, abstract and opening section of an English paper. \
                 Read them and answer the questions that follow: {clipped}"
            ),
        ),
        ChatMessage::new(
            Role::User,
            format!(
                "1. Give the title of the paper\n\
                 2. List every author (in English)\n\
                 3. Give the first author's affiliation (in English)\n\
                 4. Give the keywords of the paper (in English)\n\
                 5. Give the paper link and the Github code link (Github:None when there is none)\n\
                 6. Summarize the paper along these four points, answering in {language} (keep proper nouns in English):\n\
                 - (1): What is the research background?\n\
                 - (2): Which methods came before, what problems do they have, and is the new approach well motivated?\n\
                 - (3): What research method does the paper propose?\n\
                 - (4): On which task and with what performance do the methods succeed, and does that performance support the goals?\n\
                 Use exactly this output format:\n\
                 1. Title: xxx\n\n\
                 2. Authors: xxx\n\n\
                 3. Affiliation: xxx\n\n\
                 4. Keywords: xxx\n\n\
                 5. Urls: xxx or xxx , xxx\n\n\
                 6. Summary:\n\n\
                 - (1):xxx;\n\
                 - (2):xxx;\n\
                 - (3):xxx;\n\
                 - (4):xxx.\n\n\
                 Answer in {language}, keep statements concise and academic, avoid repetition, \
                 quote numbers as given in the paper and put each answer in place of xxx."
            ),
        ),
    ]
}

pub fn method_messages(key_words: &str, language: Language, clipped: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::new(
            Role::System,
            format!(
                "You are a researcher in the field of [{key_words}] who writes short, precise paper summaries"
            ),
        ),
        ChatMessage::new(
            Role::Assistant,
            format!(
                "Below are the <summary> you already wrote and the <Methods> part of an English paper. \
                 Read the <Methods> part and answer the questions that follow: {clipped}"
            ),
        ),
        ChatMessage::new(
            Role::User,
            format!(
                "7. Describe the methodological idea of the paper step by step, answering in {language} \
                 (keep proper nouns in English).\n\
                 Use exactly this output format:\n\
                 7. Methods:\n\n\
                 - (1):xxx;\n\
                 - (2):xxx;\n\
                 - (3):xxx;\n\
                 .......\n\n\
                 Answer in {language}, keep statements concise and academic, do not repeat the <summary>, \
                 quote numbers as given in the paper and add or drop steps as needed."
            ),
        ),
    ]
}

pub fn conclusion_messages(key_words: &str, language: Language, clipped: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::new(
            Role::System,
            format!("You are a reviewer in the field of [{key_words}] reading this paper critically"),
        ),
        ChatMessage::new(
            Role::Assistant,
            format!(
                "Below are the <summary> you already wrote and the <Conclusion> part of an English paper. \
                 Answer the questions that follow: {clipped}"
            ),
        ),
        ChatMessage::new(
            Role::User,
            format!(
                "8. Conclude, answering in {language} (keep proper nouns in English):\n\
                 - (1): What is the significance of this work?\n\
                 - (2): Rate the strengths and weaknesses in terms of innovation, performance and workload.\n\
                 Use exactly this output format:\n\
                 8. Conclusion:\n\n\
                 - (1):xxx;\n\
                 - (2):Innovation point: xxx; Performance: xxx; Workload: xxx;\n\n\
                 Answer in {language}, keep statements concise and academic, do not repeat the <summary> \
                 and quote numbers as given in the paper."
            ),
        ),
    ]
}

/// Trim every line of a model answer; each line keeps its trailing newline.
pub fn format_text(text: &str) -> String {
    text.split('\n').fold(String::with_capacity(text.len()), |mut out, line| {
        out.push_str(line.trim());
        out.push('\n');
        out
    })
}
