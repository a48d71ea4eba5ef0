//! Heuristic quality checks over a rendered dialogue transcript.
//!
//! Four issue classes are reported: filler-word overuse per speaker,
//! replies that echo the previous speaker's words, hollow acknowledgments
//! from facilitator agents, and repeated sentence starters.
//!
//! [`QualityChecker::fix_dialogue`] rewrites a transcript in place: filler
//! runs are thinned to one per line, and echo or hollow lines can be tagged.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;

use regex::Regex;
use serde::Serialize;

const FILLER_PATTERNS: &[&str] = &[
    r"\byou know\b",
    r"\bI mean\b",
    r"\bbasically\b",
    r"\bessentially\b",
    r"\bperhaps\b",
    r"\bI guess\b",
    r"\bI think\b",
    r"\bkinda\b",
    r"\blike,",
    r"\bum\b",
    r"\buh\b",
];

const HOLLOW_PATTERNS: &[&str] = &[
    r"(That|This) sounds (like a )?good( option)?",
    r"(That|This) sounds (very )?practical",
    r"(That|This) sounds (like a )?great( idea)?",
    r"Yes,? I agree\.?$",
    r"^(Yes|Yeah),? that('s| is) (a )?(good|great|excellent) (point|idea|suggestion)",
    r"^Good (point|idea|suggestion)",
    r"^That's (a )?(very )?(good|great|excellent|valid|fair) (point|idea|concern)",
];

/// Rewrites applied when thinning fillers, in application order.
const FILLER_REWRITES: &[(&str, &str)] = &[
    (r",?\s*you know[?,]?\s*", ", "),
    (r"\bI mean,?\s*", ""),
    (r"\bbasically,?\s*", ""),
    (r"\bessentially,?\s*", ""),
    (r"\bI guess,?\s*", ""),
    (r"\bperhaps\s+", "maybe "),
    (r"\bkinda\s+", "kind of "),
];

const STARTER_PATTERNS: &[&str] = &[
    r"^So,",
    r"^Yeah,",
    r"^Yes,",
    r"^Well,",
    r"^Okay,",
    r"^I think",
    r"^Perhaps",
];

const ECHO_SKIP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "to", "for", "and", "or", "but", "so", "yes",
    "yeah", "okay", "ok", "that", "this", "it", "i", "we", "you", "they",
];

const ECHO_WINDOW: usize = 8;
const ECHO_MIN_OVERLAP: usize = 3;
const FILLER_DENSITY_LIMIT: f64 = 1.0;
const STARTER_REPEAT_LIMIT: usize = 3;

/// One speaker line of a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DialogueLine {
    pub line_num: usize,
    pub speaker: String,
    pub message: String,
    /// The `=== ... ===` header the line appeared under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Parse `[HH:MM:SS] Speaker: text` lines. Headers, experiment id lines and
/// `System` messages are skipped; the timestamp prefix is optional.
pub fn parse_dialogue(text: &str) -> Vec<DialogueLine> {
    let mut lines = Vec::new();
    let mut unit = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("Experiment ID:") {
            continue;
        }
        if line.starts_with("=== ") {
            unit = Some(line.trim_matches(|c| c == '=' || c == ' ').to_string());
            continue;
        }

        let (_, body) = split_timestamp(line);
        let Some((speaker, message)) = body.split_once(": ") else {
            continue;
        };
        let speaker = speaker.trim();
        if speaker == "System" {
            continue;
        }
        lines.push(DialogueLine {
            line_num: idx + 1,
            speaker: speaker.to_string(),
            message: message.trim().to_string(),
            unit: unit.clone(),
        });
    }
    lines
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FillerStats {
    pub total_fillers: usize,
    pub messages: usize,
    pub density: f64,
    pub breakdown: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EchoIssue {
    pub line_num: usize,
    pub speaker: String,
    pub prev_speaker: String,
    pub echoed_words: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HollowIssue {
    pub line_num: usize,
    pub speaker: String,
    pub excerpt: String,
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StarterIssue {
    pub speaker: String,
    pub pattern: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityReport {
    pub messages: usize,
    pub filler_density: BTreeMap<String, FillerStats>,
    pub filler_warnings: Vec<String>,
    pub echoes: Vec<EchoIssue>,
    pub hollow: Vec<HollowIssue>,
    pub starters: Vec<StarterIssue>,
    pub total_issues: usize,
}

/// Counters from a [`QualityChecker::fix_dialogue`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FixStats {
    pub lines_processed: usize,
    pub fillers_reduced: usize,
    pub echoes_flagged: usize,
    pub hollow_flagged: usize,
}

/// Rewritten transcript plus what changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedDialogue {
    pub text: String,
    pub stats: FixStats,
}

/// Compiled pattern sets plus the speaker names treated as facilitators.
#[derive(Debug, Clone)]
pub struct QualityChecker {
    fillers: Vec<(&'static str, Regex)>,
    hollow: Vec<(&'static str, Regex)>,
    starters: Vec<(&'static str, Regex)>,
    rewrites: Vec<(Regex, &'static str)>,
    cleanup: Vec<(Regex, &'static str)>,
    facilitators: Vec<String>,
}

fn compile(patterns: &[&'static str]) -> Result<Vec<(&'static str, Regex)>, regex::Error> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).map(|re| (*p, re)))
        .collect()
}

fn compile_rewrites(
    rewrites: &[(&'static str, &'static str)],
) -> Result<Vec<(Regex, &'static str)>, regex::Error> {
    rewrites
        .iter()
        .map(|(p, with)| Regex::new(&format!("(?i){p}")).map(|re| (re, *with)))
        .collect()
}

/// Split an optional `[HH:MM:SS] ` prefix off a transcript line.
fn split_timestamp(line: &str) -> (&str, &str) {
    match line.strip_prefix('[').and_then(|rest| rest.split_once("] ")) {
        Some((_, rest)) => line.split_at(line.len() - rest.len()),
        None => ("", line),
    }
}

/// Non-trivial words among the start of `reply` that also occur in `prev`.
fn echoed_words(prev: &str, reply: &str) -> Vec<String> {
    let prev_words: HashSet<String> = words(prev).collect();
    words(reply)
        .take(ECHO_WINDOW)
        .filter(|w| prev_words.contains(w) && !ECHO_SKIP_WORDS.contains(&w.as_str()))
        .collect()
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn excerpt(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect::<String>() + "..."
    }
}

impl QualityChecker {
    /// A speaker counts as a facilitator when its name contains any of
    /// `facilitators`.
    pub fn new(facilitators: Vec<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            fillers: compile(FILLER_PATTERNS)?,
            hollow: compile(HOLLOW_PATTERNS)?,
            starters: compile(STARTER_PATTERNS)?,
            rewrites: compile_rewrites(FILLER_REWRITES)?,
            cleanup: [
                (r"\s+", " "),
                (r",\s*,", ","),
                (r"\.\s*,", "."),
                (r"^\s*,\s*", ""),
            ]
            .into_iter()
            .map(|(p, with)| Regex::new(p).map(|re| (re, with)))
            .collect::<Result<_, _>>()?,
            facilitators,
        })
    }

    fn is_facilitator(&self, speaker: &str) -> bool {
        self.facilitators
            .iter()
            .any(|f| !f.is_empty() && speaker.contains(f.as_str()))
    }

    pub fn filler_density(&self, lines: &[DialogueLine]) -> BTreeMap<String, FillerStats> {
        let mut stats: BTreeMap<String, FillerStats> = BTreeMap::new();
        for line in lines {
            let entry = stats.entry(line.speaker.clone()).or_default();
            entry.messages += 1;
            for (pattern, re) in &self.fillers {
                let hits = re.find_iter(&line.message).count();
                if hits > 0 {
                    entry.total_fillers += hits;
                    *entry.breakdown.entry((*pattern).to_string()).or_default() += hits;
                }
            }
        }
        for entry in stats.values_mut() {
            entry.density = entry.total_fillers as f64 / entry.messages as f64;
        }
        stats
    }

    pub fn echoes(&self, lines: &[DialogueLine]) -> Vec<EchoIssue> {
        lines
            .windows(2)
            .filter(|pair| pair[0].speaker != pair[1].speaker)
            .filter_map(|pair| {
                let (prev, curr) = (&pair[0], &pair[1]);
                let echoed = echoed_words(&prev.message, &curr.message);
                (echoed.len() >= ECHO_MIN_OVERLAP).then(|| EchoIssue {
                    line_num: curr.line_num,
                    speaker: curr.speaker.clone(),
                    prev_speaker: prev.speaker.clone(),
                    echoed_words: echoed,
                })
            })
            .collect()
    }

    fn is_hollow(&self, message: &str) -> bool {
        self.hollow.iter().any(|(_, re)| re.is_match(message))
    }

    /// Thin out fillers in a message, keeping at most one.
    ///
    /// Messages with zero or one filler come back unchanged. Otherwise the
    /// first match of each rewrite is applied in order until only one filler
    /// would remain, then stray spacing and punctuation are tidied.
    pub fn reduce_fillers(&self, message: &str) -> String {
        let found: usize = self
            .rewrites
            .iter()
            .map(|(re, _)| re.find_iter(message).count())
            .sum();
        if found <= 1 {
            return message.to_string();
        }

        let mut out = message.to_string();
        let mut removed = 0;
        for (re, with) in &self.rewrites {
            if removed >= found - 1 {
                break;
            }
            if re.is_match(&out) {
                out = re.replacen(&out, 1, *with).into_owned();
                removed += 1;
            }
        }
        for (re, with) in &self.cleanup {
            out = re.replace_all(&out, *with).into_owned();
        }
        out.trim().to_string()
    }

    /// Rewrite a transcript.
    ///
    /// Headers, experiment id lines, blank lines and `System` messages pass
    /// through untouched and break the echo chain. With `flag_only` the text
    /// is kept as is and echo or hollow lines get `[ECHO]` / `[HOLLOW]`
    /// prefixes; otherwise fillers are reduced and nothing is tagged.
    pub fn fix_dialogue(&self, text: &str, flag_only: bool) -> FixedDialogue {
        let mut stats = FixStats::default();
        let mut out: Vec<String> = Vec::new();
        let mut prev: Option<(String, String)> = None;

        for raw in text.lines() {
            stats.lines_processed += 1;
            let trimmed = raw.trim();
            if trimmed.is_empty()
                || trimmed.starts_with("===")
                || trimmed.starts_with("Experiment ID:")
            {
                out.push(raw.to_string());
                prev = None;
                continue;
            }

            let (stamp, body) = split_timestamp(raw);
            let Some((speaker, message)) = body.split_once(": ") else {
                out.push(raw.to_string());
                continue;
            };
            if speaker.trim() == "System" {
                out.push(raw.to_string());
                prev = None;
                continue;
            }

            let mut rewritten = message.to_string();
            let reduced = self.reduce_fillers(message);
            if reduced != message {
                stats.fillers_reduced += 1;
                if !flag_only {
                    rewritten = reduced;
                }
            }

            let mut flags = Vec::new();
            if let Some((prev_speaker, prev_message)) = &prev {
                if prev_speaker != speaker
                    && echoed_words(prev_message, message).len() >= ECHO_MIN_OVERLAP
                {
                    stats.echoes_flagged += 1;
                    flags.push("[ECHO]");
                }
            }
            if self.is_facilitator(speaker) && self.is_hollow(message) {
                stats.hollow_flagged += 1;
                flags.push("[HOLLOW]");
            }

            let line = format!("{stamp}{speaker}: {rewritten}");
            if flag_only && !flags.is_empty() {
                out.push(format!("{} {line}", flags.join(" ")));
            } else {
                out.push(line);
            }
            prev = Some((speaker.to_string(), message.to_string()));
        }

        let mut text = out.join("\n");
        text.push('\n');
        FixedDialogue { text, stats }
    }

    pub fn hollow_acknowledgments(&self, lines: &[DialogueLine]) -> Vec<HollowIssue> {
        lines
            .iter()
            .filter(|l| self.is_facilitator(&l.speaker))
            .filter_map(|l| {
                self.hollow
                    .iter()
                    .find(|(_, re)| re.is_match(&l.message))
                    .map(|(pattern, _)| HollowIssue {
                        line_num: l.line_num,
                        speaker: l.speaker.clone(),
                        excerpt: excerpt(&l.message, 100),
                        pattern: (*pattern).to_string(),
                    })
            })
            .collect()
    }

    pub fn repetitive_starters(&self, lines: &[DialogueLine]) -> Vec<StarterIssue> {
        let mut counts: BTreeMap<(String, &'static str), usize> = BTreeMap::new();
        for line in lines {
            if let Some((pattern, _)) = self.starters.iter().find(|(_, re)| re.is_match(&line.message)) {
                *counts.entry((line.speaker.clone(), *pattern)).or_default() += 1;
            }
        }
        counts
            .into_iter()
            .filter(|(_, count)| *count >= STARTER_REPEAT_LIMIT)
            .map(|((speaker, pattern), count)| StarterIssue {
                speaker,
                pattern: pattern.to_string(),
                count,
            })
            .collect()
    }

    pub fn check(&self, lines: &[DialogueLine]) -> QualityReport {
        let filler_density = self.filler_density(lines);
        let filler_warnings: Vec<String> = filler_density
            .iter()
            .filter(|(_, s)| s.density > FILLER_DENSITY_LIMIT)
            .map(|(speaker, s)| {
                format!("Speaker '{speaker}' has high filler density: {:.2} per message", s.density)
            })
            .collect();
        let echoes = self.echoes(lines);
        let hollow = self.hollow_acknowledgments(lines);
        let starters = self.repetitive_starters(lines);
        let total_issues = filler_warnings.len() + echoes.len() + hollow.len() + starters.len();

        QualityReport {
            messages: lines.len(),
            filler_density,
            filler_warnings,
            echoes,
            hollow,
            starters,
            total_issues,
        }
    }
}

/// Plain-text report. Only the first five echo and hollow findings are listed.
pub fn render_quality_report(report: &QualityReport, source: &str) -> String {
    let rule = "=".repeat(60);
    let sub = "-".repeat(40);
    let mut out = String::new();

    let _ = writeln!(out, "{rule}\nDIALOGUE QUALITY REPORT\nFile: {source}");
    let _ = writeln!(out, "Total messages analyzed: {}\n{rule}", report.messages);

    let _ = writeln!(out, "\n## FILLER WORD ANALYSIS\n{sub}");
    let mut by_density: Vec<_> = report.filler_density.iter().collect();
    by_density.sort_by(|a, b| b.1.density.total_cmp(&a.1.density));
    for (speaker, s) in by_density.into_iter().filter(|(_, s)| s.density > 0.3) {
        let _ = writeln!(
            out,
            "  {speaker}: {:.2} fillers/message ({} total in {} msgs)",
            s.density, s.total_fillers, s.messages
        );
    }
    if !report.filler_warnings.is_empty() {
        out.push_str("\n  HIGH FILLER DENSITY WARNINGS:\n");
        for w in &report.filler_warnings {
            let _ = writeln!(out, "    - {w}");
        }
    }

    let _ = writeln!(out, "\n## ECHO-REPEATING PATTERNS\n{sub}");
    let _ = writeln!(out, "  Found {} instances of echo-repeating", report.echoes.len());
    for e in report.echoes.iter().take(5) {
        let _ = writeln!(
            out,
            "  Line {}: {} echoed [{}]",
            e.line_num,
            e.speaker,
            e.echoed_words.join(", ")
        );
    }

    let _ = writeln!(out, "\n## HOLLOW FACILITATOR RESPONSES\n{sub}");
    let _ = writeln!(out, "  Found {} hollow acknowledgments", report.hollow.len());
    for h in report.hollow.iter().take(5) {
        let _ = writeln!(out, "  Line {}: \"{}\"", h.line_num, h.excerpt);
    }

    let _ = writeln!(out, "\n## REPETITIVE SENTENCE STARTERS\n{sub}");
    if report.starters.is_empty() {
        out.push_str("  No significant repetition detected\n");
    }
    for s in &report.starters {
        let _ = writeln!(
            out,
            "  - Speaker '{}' starts with '{}' {} times",
            s.speaker, s.pattern, s.count
        );
    }

    let _ = write!(
        out,
        "\n{rule}\nSUMMARY: {} total quality issues detected\n{rule}\n",
        report.total_issues
    );
    out
}
