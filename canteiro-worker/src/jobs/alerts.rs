/// Alert rows and the notifications built from them
///
/// Builders are pure so the wording, severity and dedupe keys can be tested without a
/// database. Deadline alerts key on the due date, so a renewed CA or a new ASO that
/// lapses again produces a fresh alert.

use canteiro_shared::models::notification::{NewNotification, Notification, NotificationKind, Severity};
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

/// Days before a deadline at which an alert becomes a warning
pub const WARNING_DAYS: i64 = 7;

/// Something that lapses on a date
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Deadline {
    pub entity_id: Uuid,
    pub label: String,
    pub due_on: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockSource {
    Ppe,
    Supply,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LowStock {
    pub entity_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub minimum: i32,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UpcomingVacation {
    pub entity_id: Uuid,
    pub employee_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

pub fn deadline_severity(due_on: NaiveDate, today: NaiveDate) -> Severity {
    let days = (due_on - today).num_days();
    if days < 0 {
        Severity::Critical
    } else if days <= WARNING_DAYS {
        Severity::Warning
    } else {
        Severity::Info
    }
}

/// "expired on ...", "expires today", "expires in N days"
fn lapse(due_on: NaiveDate, today: NaiveDate) -> String {
    match (due_on - today).num_days() {
        days if days < 0 => format!("expired on {}", due_on),
        0 => "expires today".to_string(),
        1 => "expires tomorrow".to_string(),
        days => format!("expires in {} days ({})", days, due_on),
    }
}

fn deadline_alert(
    kind: NotificationKind,
    entity_type: &'static str,
    title: &str,
    message: String,
    deadline: &Deadline,
    today: NaiveDate,
) -> NewNotification {
    NewNotification {
        kind,
        severity: deadline_severity(deadline.due_on, today),
        title: title.to_string(),
        message,
        entity_type: Some(entity_type),
        entity_id: Some(deadline.entity_id),
        dedupe_key: kind.dedupe_key(deadline.entity_id, deadline.due_on),
    }
}

pub fn ca_alert(deadline: &Deadline, today: NaiveDate) -> NewNotification {
    deadline_alert(
        NotificationKind::CaExpiring,
        "ppe_item",
        "PPE certificate of approval expiring",
        format!("CA of {} {}", deadline.label, lapse(deadline.due_on, today)),
        deadline,
        today,
    )
}

/// `deadline.entity_id` is the employee; `due_on` the latest ASO expiry
pub fn aso_alert(deadline: &Deadline, today: NaiveDate) -> NewNotification {
    let title = if deadline.due_on < today {
        "Health certificate overdue"
    } else {
        "Health certificate due"
    };
    deadline_alert(
        NotificationKind::AsoDue,
        "employee",
        title,
        format!("ASO of {} {}", deadline.label, lapse(deadline.due_on, today)),
        deadline,
        today,
    )
}

pub fn training_alert(deadline: &Deadline, today: NaiveDate) -> NewNotification {
    deadline_alert(
        NotificationKind::TrainingExpiring,
        "training",
        "Training expiring",
        format!("{} {}", deadline.label, lapse(deadline.due_on, today)),
        deadline,
        today,
    )
}

pub fn contract_alert(deadline: &Deadline, today: NaiveDate) -> NewNotification {
    let days = (deadline.due_on - today).num_days();
    let message = match days {
        0 => format!("Contract of {} ends today", deadline.label),
        _ => format!("Contract of {} ends in {} days ({})", deadline.label, days, deadline.due_on),
    };
    deadline_alert(
        NotificationKind::ContractEnding,
        "contract",
        "Contract ending",
        message,
        deadline,
        today,
    )
}

/// Keyed on the quantity, so each further drop below the minimum alerts once
pub fn low_stock_alert(source: StockSource, stock: &LowStock) -> NewNotification {
    let (entity_type, title) = match source {
        StockSource::Ppe => ("ppe_item", "PPE stock low"),
        StockSource::Supply => ("asset", "Supply stock low"),
    };
    let severity = if stock.quantity == 0 {
        Severity::Critical
    } else {
        Severity::Warning
    };

    NewNotification {
        kind: NotificationKind::LowStock,
        severity,
        title: title.to_string(),
        message: format!(
            "{}: {} {} left, minimum {}",
            stock.name, stock.quantity, stock.unit, stock.minimum
        ),
        entity_type: Some(entity_type),
        entity_id: Some(stock.entity_id),
        dedupe_key: NotificationKind::LowStock.dedupe_key(stock.entity_id, stock.quantity),
    }
}

pub fn vacation_alert(vacation: &UpcomingVacation, today: NaiveDate) -> NewNotification {
    let days = (vacation.start_date - today).num_days();
    let starts = match days {
        0 => "starts today".to_string(),
        1 => "starts tomorrow".to_string(),
        days => format!("starts in {} days", days),
    };

    NewNotification {
        kind: NotificationKind::VacationUpcoming,
        severity: Severity::Info,
        title: "Vacation starting soon".to_string(),
        message: format!(
            "{}'s vacation {} ({} to {})",
            vacation.employee_name, starts, vacation.start_date, vacation.end_date
        ),
        entity_type: Some("vacation"),
        entity_id: Some(vacation.entity_id),
        dedupe_key: NotificationKind::VacationUpcoming.dedupe_key(vacation.entity_id, vacation.start_date),
    }
}

/// Inserts alerts for a company; returns how many were new
pub async fn publish(pool: &PgPool, company_id: Uuid, alerts: Vec<NewNotification>) -> Result<u64, sqlx::Error> {
    let mut created = 0;
    for alert in alerts {
        if Notification::create(pool, company_id, alert).await?.is_some() {
            created += 1;
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn deadline(due_on: NaiveDate) -> Deadline {
        Deadline {
            entity_id: Uuid::nil(),
            label: "Capacete classe B (CA 31469)".to_string(),
            due_on,
        }
    }

    #[test]
    fn test_deadline_severity() {
        let today = date(2025, 3, 10);
        assert_eq!(deadline_severity(date(2025, 3, 9), today), Severity::Critical);
        assert_eq!(deadline_severity(today, today), Severity::Warning);
        assert_eq!(deadline_severity(date(2025, 3, 17), today), Severity::Warning);
        assert_eq!(deadline_severity(date(2025, 3, 18), today), Severity::Info);
    }

    #[test]
    fn test_ca_alert_wording_and_key() {
        let today = date(2025, 3, 10);
        let alert = ca_alert(&deadline(date(2025, 3, 22)), today);

        assert_eq!(alert.kind, NotificationKind::CaExpiring);
        assert_eq!(alert.entity_type, Some("ppe_item"));
        assert_eq!(
            alert.message,
            "CA of Capacete classe B (CA 31469) expires in 12 days (2025-03-22)"
        );
        assert_eq!(
            alert.dedupe_key,
            format!("ca_expiring:{}:2025-03-22", Uuid::nil())
        );
    }

    #[test]
    fn test_aso_overdue_is_critical() {
        let today = date(2025, 3, 10);
        let alert = aso_alert(&deadline(date(2025, 2, 1)), today);

        assert_eq!(alert.title, "Health certificate overdue");
        assert_eq!(alert.severity, Severity::Critical);
        assert!(alert.message.ends_with("expired on 2025-02-01"));
    }

    #[test]
    fn test_renewed_deadline_gets_new_key() {
        let today = date(2025, 3, 10);
        let first = training_alert(&deadline(date(2025, 3, 20)), today);
        let renewed = training_alert(&deadline(date(2026, 3, 20)), today);

        assert_ne!(first.dedupe_key, renewed.dedupe_key);
    }

    #[test]
    fn test_contract_ending_today() {
        let today = date(2025, 3, 10);
        let mut ending = deadline(today);
        ending.label = "Maria Souza".to_string();

        assert_eq!(
            contract_alert(&ending, today).message,
            "Contract of Maria Souza ends today"
        );
    }

    #[test]
    fn test_low_stock_alert() {
        let stock = LowStock {
            entity_id: Uuid::nil(),
            name: "Cimento CP II".to_string(),
            quantity: 0,
            minimum: 10,
            unit: "sc".to_string(),
        };
        let alert = low_stock_alert(StockSource::Supply, &stock);

        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.entity_type, Some("asset"));
        assert_eq!(alert.message, "Cimento CP II: 0 sc left, minimum 10");
        assert!(alert.dedupe_key.ends_with(":0"));
    }

    #[test]
    fn test_vacation_alert() {
        let vacation = UpcomingVacation {
            entity_id: Uuid::nil(),
            employee_name: "João Pereira".to_string(),
            start_date: date(2025, 3, 11),
            end_date: date(2025, 3, 30),
        };
        let alert = vacation_alert(&vacation, date(2025, 3, 10));

        assert_eq!(
            alert.message,
            "João Pereira's vacation starts tomorrow (2025-03-11 to 2025-03-30)"
        );
        assert_eq!(alert.kind, NotificationKind::VacationUpcoming);
    }
}
