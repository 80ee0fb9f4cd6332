use once_cell::sync::Lazy;
use regex::Regex;

pub(crate) fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {:?}: {}", pattern, e))
}

/// A named regex from one of the fixed catalogues.
pub struct Pattern {
    pub label: &'static str,
    pub regex: Regex,
}

fn catalogue(entries: &[(&'static str, &str)]) -> Vec<Pattern> {
    entries
        .iter()
        .map(|(label, pattern)| Pattern { label: *label, regex: compile(pattern) })
        .collect()
}

/// Instruction-override phrasings screened on raw user input.
pub static PROMPT_INJECTION: Lazy<Vec<Pattern>> = Lazy::new(|| {
    catalogue(&[
        (
            "instruction override",
            r"(?i)\b(ignore|disregard|forget|skip)\s+(all\s+|any\s+)?(of\s+)?(the\s+|your\s+|my\s+)?(previous|prior|above|earlier|preceding|original)\s+(instructions?|prompts?|rules|directions|context)",
        ),
        (
            "instruction override",
            r"(?i)\b(ignore|disregard|forget)\s+(all\s+)?(your|the)\s+(instructions|rules|guidelines|restrictions)",
        ),
        ("role reassignment", r"(?i)\byou\s+are\s+now\s+(a|an|the|my|in)\b"),
        ("role reassignment", r"(?i)\bfrom\s+now\s+on,?\s+you\s+(are|will|must)\b"),
        ("impersonation", r"(?i)\bpretend\s+(to\s+be|you\s+are|that\s+you)\b"),
        ("impersonation", r"(?i)\b(roleplay|role-play)\s+as\b"),
        ("system prompt probe", r"(?i)\b(reveal|show|print|repeat|output)\s+(me\s+)?(your|the)\s+(system\s+prompt|instructions|initial\s+prompt)"),
        ("instruction override", r"(?i)\bnew\s+(system\s+)?instructions?\s*:"),
        ("instruction override", r"(?i)\boverride\s+(the\s+|your\s+)?(system|safety|security)\b"),
        ("jailbreak", r"(?i)\b(jailbreak|DAN\s+mode|developer\s+mode)\b"),
        ("instruction override", r"(이전|위의|앞의)\s*(의\s*)?(모든\s*)?(지시|명령|지침|규칙)\S*\s*(을|를)?\s*(무시|잊어)"),
        ("role reassignment", r"(너는|당신은)\s*이제\s*"),
        ("system prompt probe", r"시스템\s*프롬프트"),
    ])
});

/// Heuristics for hostile SQL. Every hit is critical.
pub static INJECTION: Lazy<Vec<Pattern>> = Lazy::new(|| {
    catalogue(&[
        (
            "boolean tautology",
            r#"(?i)\bor\s+(?:(\d+)\s*=\s*(\d+)|'([^']*)'\s*=\s*'([^']*)'|"([^"]*)"\s*=\s*"([^"]*)"|true\b|not\s+false\b)"#,
        ),
        (
            "stacked destructive statement",
            r"(?i);\s*(drop|delete|truncate|alter|update|insert|create|grant|revoke|exec|execute|shutdown)\b",
        ),
        (
            "out-of-band procedure call",
            r"(?i)\b(xp_cmdshell|xp_regread|xp_dirtree|sp_executesql|sp_oacreate|openrowset|opendatasource|load_file|utl_http|utl_inaddr|dbms_pipe|dbms_ldap|pg_read_file|lo_import|copy\s+\S+\s+(to|from)\s+program|into\s+(outfile|dumpfile)|waitfor\s+delay|pg_sleep|benchmark\s*\()",
        ),
        // Matched against the statement with every balanced literal collapsed
        // to an empty one, so only a quote that closes a literal counts.
        ("comment-terminated string", r#"(?:''|"")\s*\)?\s*(--|#|/\*)"#),
        (
            "cross-schema introspection",
            r"(?i)\b(information_schema|pg_catalog|pg_shadow|pg_authid|mysql\s*\.\s*user|sys\s*\.\s*(objects|tables|columns|sql_logins)|sysobjects|syscolumns|sqlite_master|all_tables|dba_users)\b",
        ),
    ])
});

pub static DDL: Lazy<Regex> = Lazy::new(|| compile(r"(?i)\b(create|alter|drop|truncate|rename)\b"));

pub static DML: Lazy<Regex> = Lazy::new(|| compile(r"(?i)\b(insert|update|delete|merge|upsert)\b"));

/// PII catalogue. Literal values come first so that a value is masked whole
/// before any overlapping column-name rule sees it.
pub static PII: Lazy<Vec<Pattern>> = Lazy::new(|| {
    catalogue(&[
        ("resident registration number", r"\b\d{6}-?[1-8]\d{6}\b"),
        ("payment card number", r"\b(?:\d{4}[- ]?){3}\d{4}\b"),
        ("email address", r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
        ("phone number", r"\b01[016789]-?\d{3,4}-?\d{4}\b"),
        (
            "identity number column",
            r"(?i)\b(ssn|social_security(_no|_number)?|resident_(registration_)?(no|number)|rrn|jumin(_no|_number)?|passport(_no|_number)?|national_id)\b",
        ),
        (
            "payment card column",
            r"(?i)\b(card_no|card_number|credit_card(_no|_number)?|cc_number|cvv|cvc|account_number|bank_account)\b",
        ),
        (
            "credential column",
            r"(?i)\b(password|passwd|pwd|password_hash|secret|secret_key|api_key|access_token|refresh_token)\b",
        ),
        ("contact column", r"(?i)\b(email|e_mail|email_address|phone|phone_number|phone_no|mobile|mobile_phone|cell_phone|tel)\b"),
        ("address column", r"(?i)\b(address|home_address|street_address|addr|zip_code|postal_code)\b"),
        ("birth date column", r"(?i)\b(birth_date|birthdate|date_of_birth|dob|birthday)\b"),
        (
            "personal data (Korean)",
            r"(주민등록번호|주민번호|외국인등록번호|여권번호|카드번호|계좌번호|비밀번호|전화번호|휴대폰번호|휴대전화|이메일|주소|생년월일)",
        ),
    ])
});

pub static LIMIT_PRESENT: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)\blimit\s+\d+|\btop\s*\(?\s*\d+|\bfetch\s+(first|next)\s+(\d+\s+)?rows?\s+only\b")
});

pub static READ_STATEMENT: Lazy<Regex> = Lazy::new(|| compile(r"(?i)^\s*(\(\s*)*(select|with)\b"));

pub static CTE_STATEMENT: Lazy<Regex> = Lazy::new(|| compile(r"(?i)^\s*(\(\s*)*with\b"));

pub static TABLE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    compile(r#"(?i)\b(from|join|into|update|table)\s+((?:[A-Za-z_][\w$]*|"[^"]+"|`[^`]+`)(?:\s*\.\s*(?:[A-Za-z_][\w$]*|"[^"]+"|`[^`]+`))*)"#)
});

/// Calls whose argument list uses FROM without naming a table.
pub static FROM_FUNCTION_OPEN: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)\b(extract|substring|substr|trim|overlay|position)\s*$"));

pub static CTE_NAME: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)(?:\bwith(?:\s+recursive)?|,)\s*([A-Za-z_][\w$]*)\s*(?:\([^()]*\)\s*)?as\s*(?:not\s+)?(?:materialized\s+)?\(")
});

pub static QUOTED_IDENTIFIER: Lazy<Regex> = Lazy::new(|| compile(r#""(?:[^"]|"")*""#));

pub static IDENTIFIER: Lazy<Regex> = Lazy::new(|| compile(r"[A-Za-z_][\w$]*(?:\.[A-Za-z_][\w$]*)*"));

pub static STRING_LITERAL: Lazy<Regex> = Lazy::new(|| compile(r"'(?:[^']|'')*'"));

/// Case-insensitive wildcard match where `*` spans any run of characters.
pub fn glob_matches(pattern: &str, name: &str) -> bool {
    let escaped = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("(?i)^{}$", escaped))
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

/// Whole-word, case-insensitive regex for a policy keyword. Word boundaries
/// are only asserted on sides where the keyword itself has a word character.
pub fn keyword_regex(keyword: &str) -> Option<Regex> {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return None;
    }
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let lead = if keyword.chars().next().is_some_and(is_word) { r"\b" } else { "" };
    let tail = if keyword.chars().last().is_some_and(is_word) { r"\b" } else { "" };
    Regex::new(&format!("(?i){}{}{}", lead, regex::escape(keyword), tail)).ok()
}
