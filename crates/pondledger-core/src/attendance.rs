// Attendance roll-ups: days worked and wages due per employee.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::model::{AttendanceRecord, AttendanceStatus, Employee};

impl AttendanceStatus {
    /// Share of a working day this status counts for.
    pub fn day_fraction(&self) -> f64 {
        match self {
            AttendanceStatus::FullDay => 1.0,
            AttendanceStatus::HalfDay => 0.5,
            AttendanceStatus::Absent => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeAttendance {
    pub employee_id: String,
    pub name: String,
    pub full_days: u32,
    pub half_days: u32,
    pub absent_days: u32,
    pub days_worked: f64,
    /// `days_worked * daily_wage`, when the employee has a wage set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wages_due: Option<f64>,
}

/// Summarize `records` per employee, in `employees` order. Marks for
/// employees that no longer exist are ignored.
pub fn summarize(employees: &[Employee], records: &[AttendanceRecord]) -> Vec<EmployeeAttendance> {
    let mut by_employee: HashMap<&str, Vec<&AttendanceRecord>> = HashMap::new();
    for r in records {
        by_employee.entry(r.employee_id.as_str()).or_default().push(r);
    }

    employees
        .iter()
        .map(|e| {
            let marks = by_employee.get(e.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            let count = |status| marks.iter().filter(|r| r.status == status).count() as u32;
            let days_worked: f64 = marks.iter().map(|r| r.status.day_fraction()).sum();
            EmployeeAttendance {
                employee_id: e.id.clone(),
                name: e.name.clone(),
                full_days: count(AttendanceStatus::FullDay),
                half_days: count(AttendanceStatus::HalfDay),
                absent_days: count(AttendanceStatus::Absent),
                days_worked,
                wages_due: e.daily_wage.map(|w| w * days_worked),
            }
        })
        .collect()
}

/// Employees with no mark among `records` (which should all be one day).
pub fn unmarked<'a>(employees: &'a [Employee], records: &[AttendanceRecord]) -> Vec<&'a Employee> {
    let marked: HashSet<&str> = records.iter().map(|r| r.employee_id.as_str()).collect();
    employees
        .iter()
        .filter(|e| !marked.contains(e.id.as_str()))
        .collect()
}
