use std::collections::HashMap;
use std::io::{self, Write};

use rust_decimal::Decimal;
use serde::Serialize;

use super::domain::{FundraiserProgress, PlayerId, Pledge, PledgeTerms};

/// Flat, CSV-friendly projection of one pledge and its settlement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PledgeExportRow {
    pub pledge_id: String,
    pub donor_name: String,
    pub donor_email: String,
    pub pledge_type: &'static str,
    pub flat_amount: Option<Decimal>,
    pub amount_per_level: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub target_player_id: Option<String>,
    pub target_player_name: Option<String>,
    pub final_amount_owed: Option<Decimal>,
    pub payment_status: &'static str,
    pub pledged_on: String,
}

impl PledgeExportRow {
    pub fn from_pledge(pledge: &Pledge, player_names: &HashMap<PlayerId, String>) -> Self {
        let (flat_amount, amount_per_level, max_amount) = match pledge.terms {
            PledgeTerms::Flat { amount } => (Some(amount), None, None),
            PledgeTerms::PerLevel {
                amount_per_level,
                max_amount,
            } => (None, Some(amount_per_level), Some(max_amount)),
        };

        Self {
            pledge_id: pledge.id.0.clone(),
            donor_name: pledge.donor.name.clone(),
            donor_email: pledge.donor.email.clone(),
            pledge_type: pledge.terms.label(),
            flat_amount,
            amount_per_level,
            max_amount,
            target_player_id: pledge.target_player.as_ref().map(|id| id.0.clone()),
            target_player_name: pledge
                .target_player
                .as_ref()
                .and_then(|id| player_names.get(id).cloned()),
            final_amount_owed: pledge.final_amount_owed,
            payment_status: pledge.payment_status.label(),
            pledged_on: pledge.created_at.date_naive().to_string(),
        }
    }
}

/// Builds export rows in pledge creation order.
pub fn export_rows(pledges: &[Pledge], participants: &[FundraiserProgress]) -> Vec<PledgeExportRow> {
    let player_names: HashMap<PlayerId, String> = participants
        .iter()
        .map(|row| (row.player.id.clone(), row.player.display_name.clone()))
        .collect();

    let mut ordered: Vec<&Pledge> = pledges.iter().collect();
    ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    ordered
        .into_iter()
        .map(|pledge| PledgeExportRow::from_pledge(pledge, &player_names))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExportTotals {
    pub pledge_count: usize,
    pub settled_count: usize,
    pub total_owed: Decimal,
}

impl ExportTotals {
    pub fn from_rows(rows: &[PledgeExportRow]) -> Self {
        let settled: Vec<Decimal> = rows.iter().filter_map(|row| row.final_amount_owed).collect();
        Self {
            pledge_count: rows.len(),
            settled_count: settled.len(),
            total_owed: settled.into_iter().sum(),
        }
    }
}

pub fn write_pledge_csv<W: Write>(rows: &[PledgeExportRow], writer: W) -> Result<(), csv::Error> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in rows {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn pledge_csv(rows: &[PledgeExportRow]) -> Result<String, csv::Error> {
    let mut buffer = Vec::new();
    write_pledge_csv(rows, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|err| csv::Error::from(io::Error::new(io::ErrorKind::InvalidData, err)))
}
