//! 工具箱：Tool trait、注册表、调用桥，以及财务计算、结清政策、用户档案与远程代理工具

pub mod emi;
pub mod executor;
pub mod profile;
pub mod registry;
pub mod remote;
pub mod schema;
pub mod settlement;

pub use emi::{calculate_emi, CalculateEmiTool};
pub use executor::ToolExecutor;
pub use profile::{GetUserProfileTool, ProfileError, ProfileStore, UpdatePreferenceTool, UserProfile, DEFAULT_USER_ID};
pub use registry::{Tool, ToolRegistry, ToolSpec};
pub use remote::{register_remote_tools, RemoteTool};
pub use schema::args_schema;
pub use settlement::{settlement_policy_text, SettlementPolicyTool};

/// 本地工具：EMI 计算与结清政策
pub fn local_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(CalculateEmiTool);
    registry.register(SettlementPolicyTool);
    registry
}
