//! The operation catalog.
//!
//! A static, ordered registry of [`OperationDescriptor`]s loaded once at
//! start-up and shared read-only by the classifiers, the run driver and test
//! data generation. The built-in HR catalog is embedded at compile time; a
//! catalog with the same JSON schema can be loaded from disk instead.

use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use crate::domain::{
    CaseLabel, OperationDescriptor, Result, RouteCheckError, TestCase, UNRESOLVED_OPERATION,
};

const BUILTIN_CATALOG: &str = include_str!("../assets/hr_catalog.json");

/// Label used for ids missing from the display-name table.
pub const UNKNOWN_DISPLAY_NAME: &str = "未知操作";

/// Human-readable label for an operation id.
pub fn display_name(id: &str) -> &'static str {
    match id.trim() {
        "/hr/leave/balance" => "假期余额查询",
        "/hr/leave/apply" => "请假申请",
        "/hr/policy" => "HR 政策查询",
        "/hr/benefits/list" => "福利清单查询",
        "/hr/benefits/apply" => "福利申请",
        "/hr/expense/submit" => "报销申请",
        "/hr/travel/policy" => "差旅政策查询",
        "/hr/travel/apply" => "出差申请",
        "/hr/attendance/checkin" => "打卡签到",
        "/hr/attendance/status" => "出勤状态查询",
        "/hr/payroll/info" => "工资查询",
        "/hr/payroll/tax" => "个税与社保查询",
        "/hr/profile/view" => "个人档案查看",
        "/hr/profile/update" => "个人信息修改",
        "/hr/training/list" => "培训课程列表查询",
        "/hr/training/apply" => "培训报名",
        "/hr/recruitment/referral" => "内推推荐",
        "/hr/recruitment/openings" => "招聘岗位查询",
        "/hr/contract/view" => "合同查看",
        "/hr/contract/renew" => "合同续签",
        _ => UNKNOWN_DISPLAY_NAME,
    }
}

/// Ordered, validated set of operations.
#[derive(Debug, Clone)]
pub struct OperationCatalog {
    operations: Vec<OperationDescriptor>,
}

impl OperationCatalog {
    /// Build a catalog, rejecting empty catalogs, blank ids and duplicates.
    pub fn new(operations: Vec<OperationDescriptor>) -> Result<Self> {
        if operations.is_empty() {
            return Err(RouteCheckError::InvalidCatalog(
                "catalog has no operations".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for op in &operations {
            let id = op.id.trim();
            if id.is_empty() {
                return Err(RouteCheckError::InvalidCatalog(
                    "operation id must not be empty".to_string(),
                ));
            }
            if id == UNRESOLVED_OPERATION {
                return Err(RouteCheckError::InvalidCatalog(format!(
                    "operation id '{UNRESOLVED_OPERATION}' is reserved"
                )));
            }
            if !seen.insert(id.to_string()) {
                return Err(RouteCheckError::InvalidCatalog(format!(
                    "duplicate operation id: {id}"
                )));
            }
        }

        Ok(Self { operations })
    }

    /// The embedded HR catalog.
    pub fn builtin() -> Result<Self> {
        Self::from_json_str(BUILTIN_CATALOG)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let operations: Vec<OperationDescriptor> = serde_json::from_str(raw)?;
        Self::new(operations)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let catalog = Self::from_json_str(&raw)?;
        debug!(path = %path.display(), operations = catalog.len(), "loaded operation catalog");
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationDescriptor> {
        self.operations.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.operations.iter().map(|op| op.id.as_str())
    }

    pub fn get(&self, id: &str) -> Option<&OperationDescriptor> {
        let id = id.trim();
        self.operations.iter().find(|op| op.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Derive a routing test batch from the catalog's example utterances.
    ///
    /// Positive examples expect their own operation; negative examples expect
    /// the unresolved sentinel.
    pub fn generate_test_cases(&self) -> Vec<TestCase> {
        let mut ids = HashSet::new();
        let mut cases = Vec::new();

        for op in &self.operations {
            for query in &op.examples.positive {
                cases.push(
                    TestCase::new(unique_case_id(&mut ids), query.clone(), op.id.clone())
                        .with_label(CaseLabel::Positive),
                );
            }
            for query in &op.examples.negative {
                cases.push(
                    TestCase::new(unique_case_id(&mut ids), query.clone(), UNRESOLVED_OPERATION)
                        .with_label(CaseLabel::Negative),
                );
            }
        }

        cases
    }
}

/// Short random hex id, unique among `taken`.
pub(crate) fn unique_case_id(taken: &mut HashSet<String>) -> String {
    loop {
        let candidate = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        if taken.insert(candidate.clone()) {
            return candidate;
        }
    }
}
