//! EMI（等额月供）计算工具

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::{args_schema, lenient_f64, lenient_u32, parse_args};
use crate::tools::Tool;

/// calculate_emi 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct EmiArgs {
    /// The amount of debt to be settled (e.g., 5000).
    #[serde(deserialize_with = "lenient_f64")]
    #[schemars(with = "f64")]
    pub principal: f64,
    /// The annual interest rate (percentage, e.g., 10 for 10%).
    #[serde(deserialize_with = "lenient_f64")]
    #[schemars(with = "f64")]
    pub rate_of_interest: f64,
    /// The number of months to pay back the debt.
    #[serde(deserialize_with = "lenient_u32")]
    #[schemars(with = "u32")]
    pub tenure_months: u32,
}

/// 按月复利计算 EMI；年利率为百分数，利率为 0 时退化为 p / n
pub fn calculate_emi(principal: f64, annual_rate_percent: f64, tenure_months: u32) -> Result<f64, String> {
    if tenure_months == 0 {
        return Err("tenure_months must be greater than zero".to_string());
    }
    if !principal.is_finite() || !annual_rate_percent.is_finite() {
        return Err("principal and rate_of_interest must be finite numbers".to_string());
    }
    if principal < 0.0 || annual_rate_percent < 0.0 {
        return Err("principal and rate_of_interest must not be negative".to_string());
    }

    let n = tenure_months as f64;
    let r = annual_rate_percent / (12.0 * 100.0);
    if r == 0.0 {
        return Ok(principal / n);
    }
    let growth = (1.0 + r).powf(n);
    Ok(principal * r * growth / (growth - 1.0))
}

/// 与推理引擎约定的输出格式
pub fn format_emi(principal: f64, annual_rate_percent: f64, tenure_months: u32, emi: f64) -> String {
    format!(
        "The EMI for a principal of ₹{} at {}% for {} months is: ₹{:.2}",
        principal, annual_rate_percent, tenure_months, emi
    )
}

pub struct CalculateEmiTool;

#[async_trait]
impl Tool for CalculateEmiTool {
    fn name(&self) -> &str {
        "calculate_emi"
    }

    fn description(&self) -> &str {
        "Calculates the Equated Monthly Installment (EMI) for a loan settlement. \
         Returns a formatted string with the monthly EMI amount."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<EmiArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let a: EmiArgs = parse_args(args)?;
        let emi = calculate_emi(a.principal, a.rate_of_interest, a.tenure_months)
            .map_err(|e| format!("Error calculating EMI: {e}"))?;
        Ok(format_emi(a.principal, a.rate_of_interest, a.tenure_months, emi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_zero_rate_is_even_split() {
        let emi = calculate_emi(5000.0, 0.0, 10).unwrap();
        assert_eq!(format!("{emi:.2}"), "500.00");
    }

    #[test]
    fn test_standard_amortization() {
        // 100000 @ 12% / 12 月
        let emi = calculate_emi(100_000.0, 12.0, 12).unwrap();
        assert!((emi - 8884.88).abs() < 0.01, "{emi}");
    }

    #[test]
    fn test_zero_tenure_is_error() {
        assert!(calculate_emi(5000.0, 10.0, 0).is_err());
        assert!(calculate_emi(-1.0, 10.0, 3).is_err());
    }

    #[tokio::test]
    async fn test_tool_output_format() {
        let out = CalculateEmiTool
            .execute(json!({"principal": 5000, "rate_of_interest": 0, "tenure_months": "10"}))
            .await
            .unwrap();
        assert_eq!(out, "The EMI for a principal of ₹5000 at 0% for 10 months is: ₹500.00");
    }

    #[tokio::test]
    async fn test_tool_reports_invalid_tenure() {
        let err = CalculateEmiTool
            .execute(json!({"principal": 5000, "rate_of_interest": 5, "tenure_months": 0}))
            .await
            .unwrap_err();
        assert!(err.starts_with("Error calculating EMI"));
    }
}
