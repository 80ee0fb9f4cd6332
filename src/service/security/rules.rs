use std::collections::BTreeSet;

use super::patterns::{
    glob_matches, keyword_regex, CTE_NAME, DDL, DML, FROM_FUNCTION_OPEN, IDENTIFIER, INJECTION, PII,
    QUOTED_IDENTIFIER, STRING_LITERAL, TABLE_REFERENCE,
};
use super::{FindingType, SecurityFinding, Severity};
use crate::database::security_policy::SecurityPolicy;
use crate::utils::truncate_chars;

pub const MASK_TOKEN: &str = "[REDACTED]";

const EXCERPT_CHARS: usize = 80;

/// One independent check over generated SQL.
pub trait SqlRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, sql: &str, policy: Option<&SecurityPolicy>) -> Vec<SecurityFinding>;

    /// A sanitised copy of `sql`, when this rule rewrites output.
    fn rewrite(&self, _sql: &str, _policy: Option<&SecurityPolicy>) -> Option<String> {
        None
    }
}

fn finding(finding_type: FindingType, severity: Severity, description: String, matched: &str) -> SecurityFinding {
    SecurityFinding {
        finding_type,
        severity,
        description,
        matched: Some(truncate_chars(matched, EXCERPT_CHARS)),
    }
}

pub struct InjectionRule;

impl InjectionRule {
    fn is_tautology(caps: &regex::Captures<'_>) -> bool {
        let pairs = [(1, 2), (3, 4), (5, 6)];
        let compared = pairs.iter().find_map(|&(l, r)| match (caps.get(l), caps.get(r)) {
            (Some(a), Some(b)) => Some(a.as_str().eq_ignore_ascii_case(b.as_str())),
            _ => None,
        });
        // `OR TRUE` / `OR NOT FALSE` have no operands to compare.
        compared.unwrap_or(true)
    }
}

impl SqlRule for InjectionRule {
    fn name(&self) -> &'static str {
        "injection"
    }

    fn evaluate(&self, sql: &str, policy: Option<&SecurityPolicy>) -> Vec<SecurityFinding> {
        if policy.is_some_and(|p| !p.enable_injection_check) {
            return Vec::new();
        }
        let literals = STRING_LITERAL.replace_all(sql, "''");
        let collapsed = QUOTED_IDENTIFIER.replace_all(&literals, "\"\"");
        let mut findings = Vec::new();
        for pattern in INJECTION.iter() {
            let hit = match pattern.label {
                "boolean tautology" => pattern
                    .regex
                    .captures_iter(sql)
                    .find(Self::is_tautology)
                    .and_then(|caps| caps.get(0)),
                "comment-terminated string" => pattern.regex.find(&collapsed),
                _ => pattern.regex.find(sql),
            };
            if let Some(m) = hit {
                findings.push(finding(
                    FindingType::Injection,
                    Severity::Critical,
                    format!("Possible SQL injection: {}", pattern.label),
                    m.as_str(),
                ));
            }
        }
        findings
    }
}

fn keyword_findings(
    regex: &regex::Regex,
    sql: &str,
    finding_type: FindingType,
    severity: Severity,
    what: &str,
) -> Vec<SecurityFinding> {
    let mut seen = BTreeSet::new();
    regex
        .find_iter(sql)
        .filter(|m| seen.insert(m.as_str().to_ascii_uppercase()))
        .map(|m| {
            let keyword = m.as_str().to_ascii_uppercase();
            finding(finding_type, severity, format!("{} statement detected: {}", what, keyword), m.as_str())
        })
        .collect()
}

pub struct DdlRule;

impl SqlRule for DdlRule {
    fn name(&self) -> &'static str {
        "ddl"
    }

    fn evaluate(&self, sql: &str, policy: Option<&SecurityPolicy>) -> Vec<SecurityFinding> {
        match policy {
            Some(p) if p.block_ddl => keyword_findings(&DDL, sql, FindingType::Ddl, Severity::High, "DDL"),
            _ => Vec::new(),
        }
    }
}

pub struct DmlRule;

impl SqlRule for DmlRule {
    fn name(&self) -> &'static str {
        "dml"
    }

    fn evaluate(&self, sql: &str, policy: Option<&SecurityPolicy>) -> Vec<SecurityFinding> {
        match policy {
            Some(p) if p.block_dml => keyword_findings(&DML, sql, FindingType::Dml, Severity::Medium, "DML"),
            _ => Vec::new(),
        }
    }
}

pub struct BlockedKeywordRule;

impl SqlRule for BlockedKeywordRule {
    fn name(&self) -> &'static str {
        "blocked_keyword"
    }

    fn evaluate(&self, sql: &str, policy: Option<&SecurityPolicy>) -> Vec<SecurityFinding> {
        let Some(policy) = policy else { return Vec::new() };
        policy
            .blocked_keywords
            .iter()
            .filter_map(|keyword| {
                let m = keyword_regex(keyword)?.find(sql)?;
                Some(finding(
                    FindingType::BlockedKeyword,
                    Severity::High,
                    format!("Blocked keyword: {}", keyword.trim()),
                    m.as_str(),
                ))
            })
            .collect()
    }
}

fn unquote(part: &str) -> String {
    part.trim().trim_matches(|c| c == '"' || c == '`').to_string()
}

/// True when byte offset `at` sits directly inside a call such as
/// `EXTRACT(YEAR FROM col)`.
fn inside_from_function(sql: &str, at: usize) -> bool {
    let mut depth = 0usize;
    for (i, c) in sql[..at].char_indices().rev() {
        match c {
            ')' => depth += 1,
            '(' if depth == 0 => return FROM_FUNCTION_OPEN.is_match(&sql[..i]),
            '(' => depth -= 1,
            _ => {}
        }
    }
    false
}

/// Tables named after FROM/JOIN/INTO/UPDATE, schema-qualified if written so.
/// Common table expression names are not tables.
pub fn referenced_tables(sql: &str) -> Vec<String> {
    let stripped = STRING_LITERAL.replace_all(sql, "''");
    let ctes: Vec<String> = CTE_NAME
        .captures_iter(&stripped)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_ascii_lowercase()))
        .collect();
    let mut tables = Vec::new();
    for caps in TABLE_REFERENCE.captures_iter(&stripped) {
        let (Some(keyword), Some(m)) = (caps.get(1), caps.get(2)) else { continue };
        if keyword.as_str().eq_ignore_ascii_case("from") && inside_from_function(&stripped, keyword.start()) {
            continue;
        }
        let name = m.as_str().split('.').map(unquote).collect::<Vec<_>>().join(".");
        if !name.contains('.') && ctes.contains(&name.to_ascii_lowercase()) {
            continue;
        }
        if !tables.contains(&name) {
            tables.push(name);
        }
    }
    tables
}

fn name_matches(pattern: &str, qualified: &str) -> bool {
    let last = qualified.rsplit('.').next().unwrap_or(qualified);
    glob_matches(pattern, qualified) || glob_matches(pattern, last)
}

pub struct AllowedTablesRule;

impl SqlRule for AllowedTablesRule {
    fn name(&self) -> &'static str {
        "allowed_tables"
    }

    fn evaluate(&self, sql: &str, policy: Option<&SecurityPolicy>) -> Vec<SecurityFinding> {
        let Some(policy) = policy.filter(|p| !p.allowed_tables.is_empty()) else {
            return Vec::new();
        };
        referenced_tables(sql)
            .into_iter()
            .filter(|table| !policy.allowed_tables.iter().any(|p| name_matches(p, table)))
            .map(|table| {
                finding(
                    FindingType::BlockedKeyword,
                    Severity::High,
                    format!("Table not in allowed list: {}", table),
                    &table,
                )
            })
            .collect()
    }
}

pub struct DeniedColumnsRule;

impl SqlRule for DeniedColumnsRule {
    fn name(&self) -> &'static str {
        "denied_columns"
    }

    fn evaluate(&self, sql: &str, policy: Option<&SecurityPolicy>) -> Vec<SecurityFinding> {
        let Some(policy) = policy.filter(|p| !p.denied_columns.is_empty()) else {
            return Vec::new();
        };
        let stripped = STRING_LITERAL.replace_all(sql, "''");
        let mut seen = BTreeSet::new();
        IDENTIFIER
            .find_iter(&stripped)
            .map(|m| m.as_str())
            .filter(|ident| policy.denied_columns.iter().any(|p| name_matches(p, ident)))
            .filter(|ident| seen.insert(ident.to_ascii_lowercase()))
            .map(|ident| {
                finding(
                    FindingType::BlockedKeyword,
                    Severity::High,
                    format!("Denied column referenced: {}", ident),
                    ident,
                )
            })
            .collect()
    }
}

pub struct PiiRule;

impl SqlRule for PiiRule {
    fn name(&self) -> &'static str {
        "pii"
    }

    fn evaluate(&self, sql: &str, policy: Option<&SecurityPolicy>) -> Vec<SecurityFinding> {
        if !policy.is_some_and(|p| p.enable_pii_masking) {
            return Vec::new();
        }
        PII.iter()
            .filter_map(|pattern| {
                let m = pattern.regex.find(sql)?;
                Some(finding(
                    FindingType::Pii,
                    Severity::Medium,
                    format!("Personal data pattern: {}", pattern.label),
                    m.as_str(),
                ))
            })
            .collect()
    }

    fn rewrite(&self, sql: &str, policy: Option<&SecurityPolicy>) -> Option<String> {
        if !policy.is_some_and(|p| p.enable_pii_masking) {
            return None;
        }
        let mut masked = sql.to_string();
        for pattern in PII.iter() {
            masked = pattern.regex.replace_all(&masked, MASK_TOKEN).into_owned();
        }
        (masked != sql).then_some(masked)
    }
}

/// Evaluation order is fixed; the reducer does not depend on it.
pub fn default_rules() -> Vec<Box<dyn SqlRule>> {
    vec![
        Box::new(InjectionRule),
        Box::new(DdlRule),
        Box::new(DmlRule),
        Box::new(BlockedKeywordRule),
        Box::new(AllowedTablesRule),
        Box::new(DeniedColumnsRule),
        Box::new(PiiRule),
    ]
}
