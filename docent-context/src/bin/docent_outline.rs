use clap::Parser;
use docent_context::{KeywordConfig, KeywordExtractor, KeywordScore, parse_sections};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};

/// Print the sections docent would index for a Markdown file, as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the Markdown file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Maximum number of keywords listed per section.
    #[arg(short = 'k', long, default_value_t = 10)]
    max_keywords: usize,

    /// Omit section bodies from the output.
    #[arg(long)]
    titles_only: bool,
}

#[derive(Serialize)]
struct OutlineEntry<'a> {
    seq: u32,
    level: u8,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a str>,
    keywords: Vec<KeywordScore>,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let content = if let Some(input_path) = args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let extractor =
        KeywordExtractor::new(KeywordConfig::default().with_max_keywords(args.max_keywords));
    let sections = parse_sections(&content);

    let outline: Vec<OutlineEntry> = sections
        .iter()
        .map(|section| OutlineEntry {
            seq: section.seq,
            level: section.level,
            title: &section.title,
            body: (!args.titles_only).then_some(section.body.as_str()),
            keywords: extractor.extract(&section.title, &section.body),
        })
        .collect();

    let json_output = serde_json::to_string_pretty(&outline)?;
    println!("{}", json_output);

    Ok(())
}
