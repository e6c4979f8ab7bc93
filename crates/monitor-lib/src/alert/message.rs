//! Message rendering for alerts and stats replies
//!
//! Alerts are rendered as Telegram MarkdownV2; stats replies are plain text.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::error::ConfigError;
use crate::models::{Target, TargetKind, UsageSnapshot};
use crate::threshold::{AlertDecision, Severity};

/// Characters with special meaning in Telegram MarkdownV2
const MARKDOWN_V2_SPECIAL: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

/// Escape text for a MarkdownV2 message body
pub fn escape_markdown_v2(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if MARKDOWN_V2_SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn severity_badge(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🔴",
        Severity::High => "🟠",
        Severity::Warning => "🟡",
    }
}

fn kind_badge(kind: TargetKind) -> (&'static str, &'static str) {
    match kind {
        TargetKind::Container => ("🐳", "Container"),
        TargetKind::Host => ("🖥️", "Host"),
    }
}

fn percent(value: f64) -> String {
    escape_markdown_v2(&format!("{:.2}%", value))
}

/// Renders alert and stats messages in a display time zone
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    time_zone: Tz,
}

impl Default for MessageFormatter {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

impl MessageFormatter {
    /// Formatter that displays timestamps in `time_zone`
    pub fn new(time_zone: Tz) -> Self {
        Self { time_zone }
    }

    /// Formatter for an IANA zone name such as `Europe/Berlin`
    pub fn with_time_zone(name: &str) -> Result<Self, ConfigError> {
        name.parse::<Tz>().map(Self::new).map_err(|e| {
            ConfigError::invalid("time_zone", format!("unknown time zone {:?}: {}", name, e))
        })
    }

    fn timestamp(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.time_zone)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }

    /// Render an alert for a decision; `None` for [`AlertDecision::NoAlert`]
    pub fn render_alert(
        &self,
        target: &Target,
        decision: &AlertDecision,
        at: DateTime<Utc>,
    ) -> Option<String> {
        let severity = decision.severity()?;
        let (kind_emoji, kind_label) = kind_badge(target.kind);
        let header = format!(
            "{} *{}:* `{}`\n🕐 *Time:* {}",
            kind_emoji,
            kind_label,
            escape_markdown_v2(&target.name),
            escape_markdown_v2(&self.timestamp(at))
        );

        let message = match *decision {
            AlertDecision::NoAlert => return None,
            AlertDecision::CpuOnly { value, threshold } => Self::single_violation(
                "CPU",
                "🔥",
                severity,
                &header,
                value,
                threshold,
            ),
            AlertDecision::MemoryOnly { value, threshold } => Self::single_violation(
                "MEMORY",
                "💾",
                severity,
                &header,
                value,
                threshold,
            ),
            AlertDecision::Both {
                cpu_value,
                cpu_threshold,
                mem_value,
                mem_threshold,
            } => format!(
                "🚨 *RESOURCE THRESHOLD VIOLATIONS* 🚨\n\n\
                 {} *{} ALERT \\- MULTIPLE VIOLATIONS*\n\n\
                 {}\n\n\
                 📊 *CURRENT RESOURCE USAGE:*\n\
                 🔥 *CPU:* *{}*\n\
                 💾 *Memory:* *{}*\n\n\
                 ⚠️ *THRESHOLD VIOLATIONS:*\n\
                 🔥 *CPU Threshold:* {}\n\
                 💾 *Memory Threshold:* {}\n\n\
                 💡 *URGENT ACTION REQUIRED:* Both CPU and memory usage have exceeded their configured thresholds\\. Immediate scaling or optimization is needed\\.",
                severity_badge(severity),
                severity,
                header,
                percent(cpu_value),
                percent(mem_value),
                percent(cpu_threshold),
                percent(mem_threshold),
            ),
        };

        Some(message)
    }

    fn single_violation(
        resource: &str,
        emoji: &str,
        severity: Severity,
        header: &str,
        value: f64,
        threshold: f64,
    ) -> String {
        let noun = if resource == "CPU" { "CPU" } else { "Memory" };
        format!(
            "🚨 *{resource} THRESHOLD VIOLATION* 🚨\n\n\
             {badge} *{severity} ALERT*\n\n\
             {header}\n\n\
             {emoji} *{resource} USAGE VIOLATION:*\n\
             📊 *Current Usage:* *{value}*\n\
             ⚠️ *Threshold:* {threshold}\n\
             📈 *Violation:* *\\+{excess}*\n\n\
             💡 *Action Required:* {noun} usage has exceeded the configured threshold\\. Consider scaling or optimizing this target immediately\\.",
            badge = severity_badge(severity),
            value = percent(value),
            threshold = percent(threshold),
            excess = percent(value - threshold),
        )
    }

    /// Render the open-window means of every target as a plain-text summary
    pub fn render_stats(&self, snapshot: &BTreeMap<Target, UsageSnapshot>) -> String {
        if snapshot.is_empty() {
            return "No stats available yet".to_string();
        }

        let mut out = String::new();
        for (kind, title) in [
            (TargetKind::Container, "📊 Container Stats:"),
            (TargetKind::Host, "🖥️ Host Stats:"),
        ] {
            let mut entries = snapshot.iter().filter(|(t, _)| t.kind == kind).peekable();
            if entries.peek().is_none() {
                continue;
            }

            let (emoji, _) = kind_badge(kind);
            let _ = writeln!(out, "{}\n", title);
            for (target, usage) in entries {
                let _ = writeln!(out, "{} {}:", emoji, target.name);
                if usage.is_empty() {
                    let _ = writeln!(out, "  CPU: N/A\n  Memory: N/A\n");
                } else {
                    let _ = writeln!(
                        out,
                        "  CPU: {:.2}%\n  Memory: {:.2}%\n",
                        usage.cpu_percent, usage.memory_percent
                    );
                }
            }
        }

        out.trim_end().to_string()
    }
}
