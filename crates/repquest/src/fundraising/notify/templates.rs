use std::fmt::Write as _;

use rust_decimal::Decimal;

use super::{DonorStatement, LevelUpNotice, OutboundEmail, OwnerSummary, StatementLine};
use crate::fundraising::domain::PledgeTerms;
use crate::fundraising::export::{pledge_csv, PledgeExportRow};
use crate::fundraising::pledges::to_cents;

pub(super) fn level_up(notice: &LevelUpNotice) -> OutboundEmail {
    let subject = format!(
        "{} reached level {} in {}",
        notice.player_name, notice.levels, notice.fundraiser_title
    );

    let text = format!(
        "{} just reached fundraiser level {} with {} points earned during {}. Every level counts toward the pledges supporting this fundraiser.\n",
        notice.player_name, notice.levels, notice.fundraiser_points, notice.fundraiser_title
    );

    let mut html = String::new();
    writeln!(html, "<h1>Level {} unlocked!</h1>", notice.levels).expect("write heading");
    writeln!(html, "<p>{}</p>", escape_html(text.trim())).expect("write body");

    OutboundEmail {
        to: notice.recipient.clone(),
        subject,
        html,
        text,
    }
}

pub(super) fn donor_statement(statement: &DonorStatement) -> OutboundEmail {
    let subject = format!(
        "Your pledge total for {}: ${}",
        statement.fundraiser_title,
        to_cents(statement.total)
    );

    let mut text = String::new();
    writeln!(
        text,
        "Hi {}, {} has ended. Thank you for your support!",
        statement.donor.name, statement.fundraiser_title
    )
    .expect("write greeting");
    text.push('\n');
    for line in &statement.lines {
        writeln!(text, "- {}", describe_line(line)).expect("write pledge line");
    }
    text.push('\n');
    writeln!(text, "Total owed: ${}", to_cents(statement.total)).expect("write total");
    writeln!(
        text,
        "The fundraiser organizer will follow up with payment details."
    )
    .expect("write follow up");

    let mut html = String::new();
    writeln!(
        html,
        "<h1>{} has ended</h1>",
        escape_html(&statement.fundraiser_title)
    )
    .expect("write heading");
    writeln!(
        html,
        "<p>Hi {}, thank you for your support!</p><ul>",
        escape_html(&statement.donor.name)
    )
    .expect("write greeting");
    for line in &statement.lines {
        writeln!(html, "<li>{}</li>", escape_html(&describe_line(line))).expect("write line");
    }
    writeln!(
        html,
        "</ul><p><strong>Total owed: ${}</strong></p>",
        to_cents(statement.total)
    )
    .expect("write total");

    OutboundEmail {
        to: statement.donor.email.clone(),
        subject,
        html,
        text,
    }
}

pub(super) fn owner_summary(summary: &OwnerSummary) -> OutboundEmail {
    let subject = format!(
        "{} has ended: ${} pledged",
        summary.fundraiser_title,
        to_cents(summary.total_owed)
    );

    let mut text = String::new();
    writeln!(
        text,
        "Hi {}, your fundraiser {} has ended.",
        summary.recipient.name, summary.fundraiser_title
    )
    .expect("write greeting");
    text.push('\n');
    writeln!(text, "Participants: {}", summary.participant_count).expect("write participants");
    writeln!(text, "Levels earned: {}", summary.total_levels).expect("write levels");
    writeln!(
        text,
        "Pledges settled: {} from {} donors",
        summary.pledge_count, summary.donor_count
    )
    .expect("write pledges");
    if summary.excluded_pledges > 0 {
        writeln!(
            text,
            "Pledges needing manual review: {}",
            summary.excluded_pledges
        )
        .expect("write excluded");
    }
    writeln!(text, "Total owed: ${}", to_cents(summary.total_owed)).expect("write total");
    if let Some(goal) = summary.goal_amount {
        writeln!(text, "Goal: ${} ({})", to_cents(goal), goal_share(summary.total_owed, goal))
            .expect("write goal");
    }
    text.push('\n');
    text.push_str("Pledge export (CSV):\n");
    match pledge_csv(&summary.export) {
        Ok(csv) => text.push_str(&csv),
        Err(err) => {
            writeln!(text, "export unavailable: {err}").expect("write export error");
        }
    }

    let mut html = String::new();
    writeln!(
        html,
        "<h1>{} has ended</h1>",
        escape_html(&summary.fundraiser_title)
    )
    .expect("write heading");
    writeln!(
        html,
        "<p>{} participants earned {} levels. {} pledges from {} donors total <strong>${}</strong>.</p>",
        summary.participant_count,
        summary.total_levels,
        summary.pledge_count,
        summary.donor_count,
        to_cents(summary.total_owed)
    )
    .expect("write totals");
    render_export_table(&mut html, &summary.export);

    OutboundEmail {
        to: summary.recipient.email.clone(),
        subject,
        html,
        text,
    }
}

fn describe_line(line: &StatementLine) -> String {
    let terms = match line.terms {
        PledgeTerms::Flat { amount } => format!("flat pledge of ${}", to_cents(amount)),
        PledgeTerms::PerLevel {
            amount_per_level,
            max_amount,
        } => format!(
            "${} per level (max ${}) x {} levels",
            to_cents(amount_per_level),
            to_cents(max_amount),
            line.levels
        ),
    };
    match &line.target_player {
        Some(player) => format!("{terms} for {player}: ${}", to_cents(line.amount)),
        None => format!("{terms}: ${}", to_cents(line.amount)),
    }
}

fn goal_share(total: Decimal, goal: Decimal) -> String {
    if goal <= Decimal::ZERO {
        return "no goal set".to_string();
    }
    match total
        .checked_div(goal)
        .and_then(|share| share.checked_mul(Decimal::ONE_HUNDRED))
    {
        Some(pct) => format!("{}% of goal", pct.round_dp(0)),
        None => "n/a".to_string(),
    }
}

fn render_export_table(html: &mut String, rows: &[PledgeExportRow]) {
    if rows.is_empty() {
        html.push_str("<p>No pledges were made.</p>");
        return;
    }

    html.push_str(
        "<table><tr><th>Donor</th><th>Email</th><th>Type</th><th>Player</th><th>Final amount</th></tr>",
    );
    for row in rows {
        let amount = row
            .final_amount_owed
            .map(|value| format!("${}", to_cents(value)))
            .unwrap_or_else(|| "needs review".to_string());
        writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&row.donor_name),
            escape_html(&row.donor_email),
            row.pledge_type,
            escape_html(row.target_player_name.as_deref().unwrap_or("Team")),
            amount
        )
        .expect("write export row");
    }
    html.push_str("</table>");
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
