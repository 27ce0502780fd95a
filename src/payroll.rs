// payroll.rs
// Statutory payroll arithmetic. Every intermediate figure is rounded to cents.

use serde::Serialize;

use crate::models::{AdjustmentKind, DeductionLine, PayrollAdjustment, PayrollRecord};
use crate::money::round2;

pub const SSF_EMPLOYEE_RATE: f64 = 0.055;
pub const EMPLOYER_RATE: f64 = 0.13;
pub const TIER1_RATE: f64 = 0.135;
pub const TIER2_RATE: f64 = 0.05;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PayrollFigures {
    pub basic_salary: f64,
    pub allowances: f64,
    pub gross: f64,
    pub ssf_employee: f64,
    pub taxable: f64,
    pub paye: f64,
    pub deductions_total: f64,
    pub net_pay: f64,
    pub adjust_add: f64,
    pub adjust_deduct: f64,
    pub final_net: f64,
    pub employer_13: f64,
    pub total_staff_cost: f64,
    pub tier1: f64,
    pub tier2: f64,
}

impl PayrollFigures {
    pub fn compute(
        basic: f64,
        allowances: f64,
        paye: f64,
        deductions_total: f64,
        adjustments: &[PayrollAdjustment],
    ) -> Self {
        let basic_salary = round2(basic.max(0.0));
        let allowances = round2(allowances.max(0.0));
        let paye = round2(paye.max(0.0));
        let deductions_total = round2(deductions_total.max(0.0));
        let (adjust_add, adjust_deduct) = sum_adjustments(adjustments);

        let gross = round2(basic_salary + allowances);
        let ssf_employee = round2(basic_salary * SSF_EMPLOYEE_RATE);
        let taxable = round2(gross - ssf_employee);
        let net_pay = round2(gross - ssf_employee - paye - deductions_total);
        let final_net = round2(net_pay - adjust_deduct + adjust_add).max(0.0);
        let employer_13 = round2(basic_salary * EMPLOYER_RATE);

        PayrollFigures {
            basic_salary,
            allowances,
            gross,
            ssf_employee,
            taxable,
            paye,
            deductions_total,
            net_pay,
            adjust_add,
            adjust_deduct,
            final_net,
            employer_13,
            total_staff_cost: round2(net_pay + employer_13),
            tier1: round2(basic_salary * TIER1_RATE),
            tier2: round2(basic_salary * TIER2_RATE),
        }
    }

    pub fn apply_to(&self, record: &mut PayrollRecord) {
        record.basic_salary = self.basic_salary;
        record.allowances = self.allowances;
        record.gross = self.gross;
        record.ssf_employee = self.ssf_employee;
        record.taxable = self.taxable;
        record.paye = self.paye;
        record.deductions_total = self.deductions_total;
        record.net_pay = self.net_pay;
        record.adjust_add = self.adjust_add;
        record.adjust_deduct = self.adjust_deduct;
        record.final_net = self.final_net;
        record.employer_13 = self.employer_13;
        record.total_staff_cost = self.total_staff_cost;
        record.tier1 = self.tier1;
        record.tier2 = self.tier2;
    }
}

/// Negative amounts count as zero.
pub fn sum_adjustments(adjustments: &[PayrollAdjustment]) -> (f64, f64) {
    let mut add = 0.0;
    let mut deduct = 0.0;
    for adj in adjustments {
        let amount = adj.amount.max(0.0);
        match adj.kind {
            AdjustmentKind::Add => add += amount,
            AdjustmentKind::Deduct => deduct += amount,
        }
    }
    (round2(add), round2(deduct))
}

pub fn sum_deductions(lines: &[DeductionLine]) -> f64 {
    round2(lines.iter().map(|d| d.amount.max(0.0)).sum())
}

/// Column totals for a month listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PayrollTotals {
    pub count: usize,
    pub gross: f64,
    pub ssf_employee: f64,
    pub paye: f64,
    pub deductions_total: f64,
    pub net_pay: f64,
    pub final_net: f64,
    pub employer_13: f64,
    pub total_staff_cost: f64,
}

impl PayrollTotals {
    pub fn from_records(records: &[PayrollRecord]) -> Self {
        let mut t = PayrollTotals::default();
        for r in records {
            t.count += 1;
            t.gross += r.gross;
            t.ssf_employee += r.ssf_employee;
            t.paye += r.paye;
            t.deductions_total += r.deductions_total;
            t.net_pay += r.net_pay;
            t.final_net += r.final_net;
            t.employer_13 += r.employer_13;
            t.total_staff_cost += r.total_staff_cost;
        }
        t.gross = round2(t.gross);
        t.ssf_employee = round2(t.ssf_employee);
        t.paye = round2(t.paye);
        t.deductions_total = round2(t.deductions_total);
        t.net_pay = round2(t.net_pay);
        t.final_net = round2(t.final_net);
        t.employer_13 = round2(t.employer_13);
        t.total_staff_cost = round2(t.total_staff_cost);
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adj(kind: AdjustmentKind, amount: f64) -> PayrollAdjustment {
        PayrollAdjustment {
            kind,
            amount,
            reason: "test".into(),
            by: "hr".into(),
            at: None,
        }
    }

    #[test]
    fn basic_and_allowance_figures() {
        let f = PayrollFigures::compute(1000.0, 200.0, 0.0, 0.0, &[]);
        assert_eq!(f.gross, 1200.0);
        assert_eq!(f.ssf_employee, 55.0);
        assert_eq!(f.taxable, 1145.0);
        assert_eq!(f.employer_13, 130.0);
        assert_eq!(f.net_pay, 1145.0);
        assert_eq!(f.final_net, 1145.0);
        assert_eq!(f.total_staff_cost, 1275.0);
        assert_eq!(f.tier1, 135.0);
        assert_eq!(f.tier2, 50.0);
    }

    #[test]
    fn paye_deductions_and_adjustments() {
        let f = PayrollFigures::compute(
            2500.0,
            0.0,
            150.25,
            100.0,
            &[adj(AdjustmentKind::Add, 40.0), adj(AdjustmentKind::Deduct, 15.5)],
        );
        assert_eq!(f.ssf_employee, 137.5);
        assert_eq!(f.net_pay, 2112.25);
        assert_eq!(f.adjust_add, 40.0);
        assert_eq!(f.adjust_deduct, 15.5);
        assert_eq!(f.final_net, 2136.75);
        assert_eq!(f.total_staff_cost, 2437.25);
    }

    #[test]
    fn adjustments_leave_staff_cost_alone() {
        let plain = PayrollFigures::compute(1000.0, 200.0, 0.0, 0.0, &[]);
        let adjusted = PayrollFigures::compute(
            1000.0,
            200.0,
            0.0,
            0.0,
            &[adj(AdjustmentKind::Add, 300.0), adj(AdjustmentKind::Deduct, 50.0)],
        );
        assert_eq!(adjusted.final_net, 1395.0);
        assert_eq!(adjusted.total_staff_cost, plain.total_staff_cost);
    }

    #[test]
    fn final_net_never_negative() {
        let f = PayrollFigures::compute(100.0, 0.0, 0.0, 500.0, &[adj(AdjustmentKind::Deduct, 10.0)]);
        assert!(f.net_pay < 0.0);
        assert_eq!(f.final_net, 0.0);
        assert_eq!(f.total_staff_cost, -392.5);
    }

    #[test]
    fn negative_adjustments_are_ignored() {
        let (add, deduct) = sum_adjustments(&[adj(AdjustmentKind::Add, -5.0), adj(AdjustmentKind::Deduct, 2.346)]);
        assert_eq!(add, 0.0);
        assert_eq!(deduct, 2.35);
    }
}
