//! 升级通知文案生成
//!
//! 按升级级别(1-3)生成主题/开场/正文/行动号召，级别越高语气越重。
//! 变体默认随机挑选，测试可以通过种子或显式variant索引固定输出。

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;

struct LevelTemplates {
    subjects: &'static [&'static str],
    openings: &'static [&'static str],
    bodies: &'static [&'static str],
    calls_to_action: &'static [&'static str],
}

// 级别1: 友好提醒
static LEVEL_ONE: LevelTemplates = LevelTemplates {
    subjects: &[
        "⏰ Gentle Reminder: {ownerName} missed \"{taskTitle}\" deadline",
        "🔔 Hey {contactName}, {ownerName} could use your support",
        "⏰ {ownerName} missed their deadline for \"{taskTitle}\"",
    ],
    openings: &[
        "Hi {contactName}, just a gentle nudge from AccountaList!",
        "Hey {contactName}, hope you're doing well!",
        "Hi {contactName}, this is a friendly reminder from AccountaList.",
    ],
    bodies: &[
        "{ownerName} missed their deadline for \"{taskTitle}\" which was due {dueDate}. As their accountability contact, maybe a friendly check-in would help?",
        "{ownerName} was supposed to complete \"{taskTitle}\" by {dueDate}, but they haven't marked it as done yet. They might need some encouragement!",
        "Your accountability buddy {ownerName} missed their \"{taskTitle}\" deadline. Time for some friendly motivation?",
        "{ownerName} is {hoursOverdue} behind on \"{taskTitle}\". A gentle nudge from you could make all the difference!",
    ],
    calls_to_action: &[
        "Consider sending them a supportive message or checking if they need help!",
        "Maybe reach out and see if they need assistance or motivation?",
        "A friendly text or call might be just what they need to get back on track.",
        "Your encouragement could help them push through and complete this task!",
    ],
};

// 级别2: 升级警报
static LEVEL_TWO: LevelTemplates = LevelTemplates {
    subjects: &[
        "🚨 Escalation Alert: {ownerName} still hasn't completed \"{taskTitle}\"",
        "🔥 Second Warning: {ownerName} is seriously behind on \"{taskTitle}\"",
        "🚨 {ownerName} needs intervention - \"{taskTitle}\" still incomplete",
    ],
    openings: &[
        "Hi {contactName}, this is a more serious escalation from AccountaList.",
        "{contactName}, we need your help - this is escalation level 2.",
        "Hey {contactName}, time for stronger intervention.",
    ],
    bodies: &[
        "This is the SECOND escalation for {ownerName}. They're now {hoursOverdue} overdue on \"{taskTitle}\" and clearly struggling with accountability.",
        "{ownerName} is {hoursOverdue} behind schedule on \"{taskTitle}\". The gentle approach didn't work - time for tougher love!",
        "Houston, we have a problem! {ownerName} has ignored their commitment to \"{taskTitle}\" for {hoursOverdue}. They need your intervention.",
        "Red alert! {ownerName} is failing their accountability system. \"{taskTitle}\" was due {dueDate} and they're {hoursOverdue} overdue.",
    ],
    calls_to_action: &[
        "This calls for stronger encouragement - maybe it's time for a direct conversation?",
        "Consider escalating your support - a phone call or in-person check-in might be needed.",
        "Time to apply some pressure! They clearly need more than gentle encouragement.",
        "Your buddy is struggling. Time to step up the accountability game!",
    ],
};

// 级别3: 最大羞耻
static LEVEL_THREE: LevelTemplates = LevelTemplates {
    subjects: &[
        "💀 MAXIMUM SHAME: {ownerName} has officially failed \"{taskTitle}\"",
        "🔥💀 FINAL ESCALATION: {ownerName} completely dropped the ball",
        "💀 SHAME ALERT: {ownerName} has broken their commitment to \"{taskTitle}\"",
    ],
    openings: &[
        "💀 MAXIMUM SHAME ACTIVATED 💀",
        "🔥 FINAL ESCALATION - NO MORE MR. NICE GUY 🔥",
        "💀 This is it, {contactName}. Maximum accountability mode. 💀",
    ],
    bodies: &[
        "💀 OFFICIAL FAILURE NOTICE 💀\n\n{ownerName} has completely failed their commitment to \"{taskTitle}\". They are now {hoursOverdue} overdue and have ignored TWO previous escalations. This is public accountability failure.",
        "🔥 SHAME LEVEL: MAXIMUM 🔥\n\n{ownerName} promised to complete \"{taskTitle}\" by {dueDate}. They are now {hoursOverdue} overdue and have officially broken their word. Time for consequences!",
        "💀 ACCOUNTABILITY BREAKDOWN 💀\n\n{ownerName} has demonstrated they cannot be trusted to keep their commitments. \"{taskTitle}\" remains incomplete after {hoursOverdue}. The gentle approach failed. The escalation failed. Maximum shame is now justified.",
        "🚨 COMMITMENT VIOLATION 🚨\n\n{ownerName} made a promise to complete \"{taskTitle}\" and broke it. {hoursOverdue} overdue. Two escalations ignored. Your accountability buddy has failed the system.",
    ],
    calls_to_action: &[
        "Time for the consequences they agreed to. No more excuses!",
        "They agreed to maximum shame for a reason. Time to deliver!",
        "This is why they added you as an accountability contact. Don't hold back!",
        "Public accountability failure demands public consequences. You know what to do!",
    ],
};

fn templates_for_level(level: i32) -> &'static LevelTemplates {
    match level {
        3 => &LEVEL_THREE,
        2 => &LEVEL_TWO,
        _ => &LEVEL_ONE,
    }
}

/// 级别对应的强度标签，下游样式也依赖它区分语气
pub fn intensity_label(level: i32) -> &'static str {
    match level.clamp(1, 3) {
        1 => "friendly nudge",
        2 => "serious concern",
        3 => "maximum shame",
        _ => unreachable!(),
    }
}

/// 文案渲染上下文
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub level: i32,
    pub task_title: String,
    pub owner_name: String,
    pub owner_email: String,
    pub contact_name: String,
    pub due_date: DateTime<Utc>,
    pub overdue_minutes: i64,
    pub relationship: String,
    pub custom_message: String,
    /// 固定变体索引，None时随机挑选
    pub variant: Option<usize>,
}

/// 生成结果
#[derive(Debug, Clone, Serialize)]
pub struct ShameContent {
    pub subject: String,
    pub opening: String,
    pub body: String,
    pub call_to_action: String,
    pub level: i32,
    pub intensity: &'static str,
}

pub struct ShameMessageGenerator {
    rng: Mutex<StdRng>,
}

impl ShameMessageGenerator {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// 固定种子的生成器，测试中保证变体选择可复现
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn generate(&self, ctx: &MessageContext) -> ShameContent {
        let level = ctx.level.clamp(1, 3);
        let templates = templates_for_level(level);

        let subject = self.select(templates.subjects, ctx.variant);
        let opening = self.select(templates.openings, ctx.variant);
        let body = self.select(templates.bodies, ctx.variant);
        let call_to_action = self.select(templates.calls_to_action, ctx.variant);

        let due_date = format_due_date_long(ctx.due_date);
        let hours_overdue = format_overdue_time(ctx.overdue_minutes);
        let variables: [(&str, &str); 8] = [
            ("taskTitle", ctx.task_title.as_str()),
            ("ownerName", ctx.owner_name.as_str()),
            ("ownerEmail", ctx.owner_email.as_str()),
            ("contactName", ctx.contact_name.as_str()),
            ("dueDate", due_date.as_str()),
            ("hoursOverdue", hours_overdue.as_str()),
            ("relationship", ctx.relationship.as_str()),
            ("customMessage", ctx.custom_message.as_str()),
        ];

        ShameContent {
            subject: substitute(subject, &variables),
            opening: substitute(opening, &variables),
            body: substitute(body, &variables),
            call_to_action: substitute(call_to_action, &variables),
            level,
            intensity: intensity_label(level),
        }
    }

    fn select(&self, variants: &'static [&'static str], variant: Option<usize>) -> &'static str {
        if let Some(index) = variant {
            if index < variants.len() {
                return variants[index];
            }
        }
        let mut rng = self.rng.lock().unwrap();
        variants[rng.random_range(0..variants.len())]
    }
}

impl Default for ShameMessageGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// `{name}` 占位符替换。上下文中没有的占位符替换为空串，
/// 非标识符形式的花括号内容原样保留
fn substitute(template: &str, variables: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                let is_placeholder = !name.is_empty()
                    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                if is_placeholder {
                    if let Some((_, value)) = variables.iter().find(|(key, _)| *key == name) {
                        out.push_str(value);
                    }
                } else {
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// 逾期时长的人类可读格式。
/// 边界与单复数行为刻意保持与线上一致（"1 days and 1 hours"）
pub fn format_overdue_time(total_minutes: i64) -> String {
    if total_minutes < 60 {
        format!("{total_minutes} minutes")
    } else if total_minutes < 1440 {
        let hours = total_minutes / 60;
        let minutes = total_minutes % 60;
        if minutes > 0 {
            format!("{hours} hours and {minutes} minutes")
        } else {
            format!("{hours} hours")
        }
    } else {
        let days = total_minutes / 1440;
        let remaining_hours = (total_minutes % 1440) / 60;
        if remaining_hours > 0 {
            format!("{days} days and {remaining_hours} hours")
        } else {
            format!("{days} days")
        }
    }
}

/// 正文中的完整日期，如 "Monday, June 1, 2026"
pub fn format_due_date_long(due_date: DateTime<Utc>) -> String {
    due_date.format("%A, %B %-d, %Y").to_string()
}

/// 策略模板中的短日期，如 "6/1/2026"
pub fn format_due_date_short(due_date: DateTime<Utc>) -> String {
    due_date.format("%-m/%-d/%Y").to_string()
}

/// 调度器渲染策略模板时的上下文
#[derive(Debug, Clone)]
pub struct PolicyTemplateContext<'a> {
    pub contact_name: &'a str,
    pub owner_name: &'a str,
    pub owner_email: &'a str,
    pub task_title: &'a str,
    pub level: i32,
    pub due_date: DateTime<Utc>,
    pub minutes_overdue: i64,
}

fn default_policy_template(level: i32) -> &'static str {
    match level {
        2 => "{{contactName}}, this is the second escalation! {{ownerName}} still hasn't completed \"{{taskTitle}}\" ({{minutesOverdue}} minutes overdue). Time for stronger encouragement!",
        3 => "FINAL ESCALATION: {{contactName}}, {{ownerName}} has officially failed their commitment to complete \"{{taskTitle}}\". Maximum shame mode activated! {{minutesOverdue}} minutes overdue.",
        _ => "Hi {{contactName}}, {{ownerName}} missed their deadline for \"{{taskTitle}}\" which was due {{dueDate}}. They've been overdue for {{minutesOverdue}} minutes. As their accountability contact, please check in with them!",
    }
}

/// 用 `{{name}}` 语法渲染策略模板，策略未带模板时按级别使用内置默认
pub fn render_policy_template(template: Option<&str>, ctx: &PolicyTemplateContext) -> String {
    let template = template.unwrap_or_else(|| default_policy_template(ctx.level));

    template
        .replace("{{contactName}}", ctx.contact_name)
        .replace("{{ownerName}}", ctx.owner_name)
        .replace("{{ownerEmail}}", ctx.owner_email)
        .replace("{{taskTitle}}", ctx.task_title)
        .replace("{{escalationLevel}}", &ctx.level.to_string())
        .replace("{{dueDate}}", &format_due_date_short(ctx.due_date))
        .replace("{{minutesOverdue}}", &ctx.minutes_overdue.to_string())
}

/// 通知邮件的HTML正文，强调色随级别加深
pub fn render_email_html(content: &ShameContent, custom_message: &str) -> String {
    let accent = match content.level {
        3 => "#dc2626",
        2 => "#ea580c",
        _ => "#2563eb",
    };
    let body_html = content.body.replace('\n', "<br/>");
    let custom_block = if custom_message.is_empty() {
        String::new()
    } else {
        format!(
            "<blockquote style=\"border-left:4px solid {accent};margin:16px 0;padding:8px 16px;color:#374151;\">{custom_message}</blockquote>"
        )
    };

    format!(
        "<div style=\"font-family:Helvetica,Arial,sans-serif;max-width:600px;margin:0 auto;padding:24px;\">\
<h2 style=\"color:{accent};\">{opening}</h2>\
<p style=\"font-size:16px;line-height:1.6;color:#111827;\">{body}</p>\
{custom_block}\
<p style=\"font-size:15px;font-weight:bold;color:{accent};\">{call_to_action}</p>\
<hr style=\"border:none;border-top:1px solid #e5e7eb;margin:24px 0;\"/>\
<p style=\"font-size:12px;color:#6b7280;\">AccountaList escalation — intensity: {intensity}</p>\
</div>",
        accent = accent,
        opening = content.opening,
        body = body_html,
        custom_block = custom_block,
        call_to_action = content.call_to_action,
        intensity = content.intensity,
    )
}
