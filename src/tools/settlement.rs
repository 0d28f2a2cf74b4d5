//! 一次性结清折扣政策查询

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::{args_schema, lenient_f64, parse_args};
use crate::tools::Tool;

/// 高于该金额的欠款适用较低折扣
pub const HIGH_DEBT_THRESHOLD: f64 = 10_000.0;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SettlementArgs {
    /// The current total debt amount.
    #[serde(deserialize_with = "lenient_f64")]
    #[schemars(with = "f64")]
    pub debt_amount: f64,
}

/// 最大折扣百分比：> 10,000 为 20%，否则 30%
pub fn max_settlement_discount(debt_amount: f64) -> u8 {
    if debt_amount > HIGH_DEBT_THRESHOLD {
        20
    } else {
        30
    }
}

pub fn settlement_policy_text(debt_amount: f64) -> String {
    let discount = max_settlement_discount(debt_amount);
    let bracket = if debt_amount > HIGH_DEBT_THRESHOLD { "over" } else { "under" };
    format!(
        "For debts {bracket} ₹10,000, we can offer a maximum discount of {discount}% on one-time settlement."
    )
}

pub struct SettlementPolicyTool;

#[async_trait]
impl Tool for SettlementPolicyTool {
    fn name(&self) -> &str {
        "check_settlement_policy"
    }

    fn description(&self) -> &str {
        "Checks the internal policy to see if a settlement discount is allowed. \
         Returns the maximum discount percentage allowed for the given debt amount."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<SettlementArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let a: SettlementArgs = parse_args(args)?;
        Ok(settlement_policy_text(a.debt_amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_policy_brackets() {
        let high = SettlementPolicyTool.execute(json!({"debt_amount": 12000})).await.unwrap();
        assert_eq!(
            high,
            "For debts over ₹10,000, we can offer a maximum discount of 20% on one-time settlement."
        );
        let low = SettlementPolicyTool.execute(json!({"debt_amount": "5000"})).await.unwrap();
        assert!(low.contains("maximum discount of 30%"));
    }

    #[test]
    fn test_threshold_is_exclusive() {
        assert_eq!(max_settlement_discount(10_000.0), 30);
        assert_eq!(max_settlement_discount(10_000.01), 20);
    }

    #[tokio::test]
    async fn test_missing_amount_is_error() {
        assert!(SettlementPolicyTool.execute(json!({})).await.is_err());
    }
}
