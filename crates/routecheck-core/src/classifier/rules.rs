//! Deterministic keyword-cascade classifier.
//!
//! The cascade is an ordered table of [`CategoryRule`]s. Each category is a
//! disjunction of substring keywords; inside a matched category the
//! [`SubRule`]s are tried in order and the first match wins. A category with
//! no matching sub-rule resolves to its `fallback`, or, when it has none,
//! lets the cascade continue to the next category. Earlier categories always
//! win over later ones, even when a later category's keywords also occur.
//!
//! The order of [`HR_CASCADE`] is load-bearing: golden tests pin it.

use async_trait::async_trait;

use super::Classifier;
use crate::completion::CompletionError;
use crate::domain::{RoutePlan, UserTurn};

/// Operation returned when no category matches.
pub const DEFAULT_OPERATION: &str = "/hr/policy";

/// Secondary disambiguation inside a category.
#[derive(Debug, Clone, Copy)]
pub struct SubRule {
    /// Matches when any keyword occurs.
    pub keywords: &'static [&'static str],
    /// Extra keyword that must also occur.
    pub requires: Option<&'static str>,
    pub operation: &'static str,
}

impl SubRule {
    const fn any(keywords: &'static [&'static str], operation: &'static str) -> Self {
        Self {
            keywords,
            requires: None,
            operation,
        }
    }

    const fn any_with(
        keywords: &'static [&'static str],
        requires: &'static str,
        operation: &'static str,
    ) -> Self {
        Self {
            keywords,
            requires: Some(requires),
            operation,
        }
    }

    fn matches(&self, normalized: &str) -> bool {
        contains_any(normalized, self.keywords)
            && self.requires.map_or(true, |k| normalized.contains(k))
    }
}

/// One top-level category of the cascade.
#[derive(Debug, Clone, Copy)]
pub struct CategoryRule {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    pub sub_rules: &'static [SubRule],
    /// `None` means an unresolved category falls through to the next one.
    pub fallback: Option<&'static str>,
}

impl CategoryRule {
    fn resolve(&self, normalized: &str) -> Option<&'static str> {
        self.sub_rules
            .iter()
            .find(|sub| sub.matches(normalized))
            .map(|sub| sub.operation)
            .or(self.fallback)
    }
}

const EXPENSE_ACTION: &[&str] = &["申请", "帮我", "提交", "费用", "金额", "元"];

/// The HR routing cascade, highest priority first.
pub static HR_CASCADE: &[CategoryRule] = &[
    CategoryRule {
        name: "leave",
        keywords: &["请假", "休假", "年假", "病假", "婚假", "产假"],
        sub_rules: &[
            SubRule::any(&["还有", "剩", "几天", "多少", "余额"], "/hr/leave/balance"),
            SubRule::any(&["申请", "帮我", "请", "休", "从", "到"], "/hr/leave/apply"),
        ],
        fallback: Some("/hr/policy"),
    },
    CategoryRule {
        name: "policy",
        keywords: &["政策", "制度", "规定", "标准"],
        sub_rules: &[SubRule::any(&["差旅"], "/hr/travel/policy")],
        fallback: Some("/hr/policy"),
    },
    CategoryRule {
        name: "benefits",
        keywords: &["福利", "补贴", "礼金", "礼品", "餐补", "交通补"],
        sub_rules: &[
            SubRule::any(&["申请", "领取", "拿", "发"], "/hr/benefits/apply"),
            SubRule::any(&["有哪些", "包含", "清单", "明细"], "/hr/benefits/list"),
        ],
        fallback: Some("/hr/policy"),
    },
    CategoryRule {
        name: "expense",
        keywords: &["报销", "差旅", "出差", "住宿", "机票", "交通费", "餐费"],
        sub_rules: &[
            SubRule::any_with(EXPENSE_ACTION, "出差", "/hr/travel/apply"),
            SubRule::any(EXPENSE_ACTION, "/hr/expense/submit"),
        ],
        fallback: Some("/hr/travel/policy"),
    },
    CategoryRule {
        name: "attendance",
        keywords: &["打卡", "签到", "上班", "出勤"],
        sub_rules: &[
            SubRule::any(&["查", "查看", "看下", "记录", "出勤状态"], "/hr/attendance/status"),
            SubRule::any(&["打卡", "签到", "上班"], "/hr/attendance/checkin"),
        ],
        fallback: None,
    },
    CategoryRule {
        name: "payroll",
        keywords: &["工资", "薪资", "发薪", "到账"],
        sub_rules: &[],
        fallback: Some("/hr/payroll/info"),
    },
    CategoryRule {
        name: "tax",
        keywords: &["个税", "社保", "五险一金", "扣税"],
        sub_rules: &[],
        fallback: Some("/hr/payroll/tax"),
    },
    CategoryRule {
        name: "profile",
        keywords: &["档案", "部门", "岗位", "入职"],
        sub_rules: &[SubRule::any(&["修改", "更新", "变更"], "/hr/profile/update")],
        fallback: Some("/hr/profile/view"),
    },
    CategoryRule {
        name: "training",
        keywords: &["培训", "课程", "学习"],
        sub_rules: &[SubRule::any(&["报名", "申请", "参加"], "/hr/training/apply")],
        fallback: Some("/hr/training/list"),
    },
    CategoryRule {
        name: "recruitment",
        keywords: &["招聘", "岗位", "职位", "在招"],
        sub_rules: &[],
        fallback: Some("/hr/recruitment/openings"),
    },
    CategoryRule {
        name: "referral",
        keywords: &["内推", "推荐", "候选人"],
        sub_rules: &[],
        fallback: Some("/hr/recruitment/referral"),
    },
    CategoryRule {
        name: "contract",
        keywords: &["合同", "续签", "签约"],
        sub_rules: &[
            SubRule::any(&["查看", "查", "到期", "什么时候到期"], "/hr/contract/view"),
            SubRule::any(&["续签", "延长", "续"], "/hr/contract/renew"),
        ],
        fallback: Some("/hr/contract/view"),
    },
];

/// Lower-case and strip every whitespace character.
pub fn normalize(query: &str) -> String {
    query
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn contains_any(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| haystack.contains(k))
}

/// Which rule produced a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleMatch {
    pub operation: &'static str,
    /// `None` when the default route was used.
    pub category: Option<&'static str>,
}

/// Keyword-cascade classifier. Pure, deterministic and total.
#[derive(Debug, Clone, Copy)]
pub struct RuleClassifier {
    cascade: &'static [CategoryRule],
    default_operation: &'static str,
}

impl Default for RuleClassifier {
    fn default() -> Self {
        Self::new(HR_CASCADE, DEFAULT_OPERATION)
    }
}

impl RuleClassifier {
    pub fn new(cascade: &'static [CategoryRule], default_operation: &'static str) -> Self {
        Self {
            cascade,
            default_operation,
        }
    }

    /// Map a query to an operation id. Never empty, never the unresolved sentinel.
    pub fn classify(&self, query: &str) -> &'static str {
        self.explain(query).operation
    }

    pub fn explain(&self, query: &str) -> RuleMatch {
        let normalized = normalize(query);
        self.cascade
            .iter()
            .filter(|category| contains_any(&normalized, category.keywords))
            .find_map(|category| {
                category.resolve(&normalized).map(|operation| RuleMatch {
                    operation,
                    category: Some(category.name),
                })
            })
            .unwrap_or(RuleMatch {
                operation: self.default_operation,
                category: None,
            })
    }

    pub fn cascade(&self) -> &'static [CategoryRule] {
        self.cascade
    }
}

#[async_trait]
impl Classifier for RuleClassifier {
    fn name(&self) -> &str {
        "rule"
    }

    async fn route(&self, turn: &UserTurn) -> Result<RoutePlan, CompletionError> {
        let matched = self.explain(&turn.query);
        let reason = match matched.category {
            Some(category) => format!("keyword rule '{category}'"),
            None => "no keyword rule matched; default route".to_string(),
        };
        Ok(RoutePlan::new(matched.operation, reason))
    }
}
