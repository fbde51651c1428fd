// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Blog entities and their field validation.

use crate::error::FieldErrors;
use crate::input::FieldSet;
use crate::links;
use chrono::NaiveDate;
use std::fmt;
use std::str::FromStr;

const REQUIRED: &str = "This field is required.";
const BLANK: &str = "This field may not be blank.";

/// Entity kinds exposed by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    User,
    Blog,
    Entry,
}

impl Kind {
    pub const ALL: [Kind; 3] = [Kind::User, Kind::Entry, Kind::Blog];

    /// URL collection segment.
    pub fn segment(&self) -> &'static str {
        match self {
            Self::User => "users",
            Self::Blog => "blogs",
            Self::Entry => "entries",
        }
    }

    pub fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.segment() == segment)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Blog => "blog",
            Self::Entry => "entry",
        }
    }
}

/// Stored record: anything with a store-assigned primary key.
pub trait Record: Clone + Send + Sync + 'static {
    const KIND: Kind;

    fn id(&self) -> u64;

    fn set_id(&mut self, id: u64);

    /// Fields that must be unique across the collection, with their values.
    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }
}

/// Field-level validation against submitted data.
///
/// With `partial` set (PATCH) absent fields keep their current value;
/// otherwise absent required fields are errors.
pub trait Changeset {
    fn apply(&mut self, fields: &FieldSet, partial: bool) -> Result<(), FieldErrors>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub accesskey: String,
    /// Write-only; never rendered.
    pub secretkey: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blog {
    pub id: u64,
    pub name: String,
    pub tagline: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: u64,
    pub blog: u64,
    pub users: Vec<u64>,
    pub headline: String,
    pub body_text: String,
    /// Relative media URL of the attached image.
    pub image: Option<String>,
    pub number_comments: u32,
    pub scoring: Scoring,
    pub pub_date: NaiveDate,
    /// Set by the server on every save.
    pub mod_date: NaiveDate,
}

impl Entry {
    /// Blank entry dated `today`, ready for a full changeset.
    pub fn dated(today: NaiveDate) -> Self {
        Self {
            id: 0,
            blog: 0,
            users: Vec::new(),
            headline: String::new(),
            body_text: String::new(),
            image: None,
            number_comments: 0,
            scoring: Scoring::default(),
            pub_date: today,
            mod_date: today,
        }
    }
}

/// Any entity, for code paths that do not care which.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    User(User),
    Blog(Blog),
    Entry(Entry),
}

impl Resource {
    pub fn id(&self) -> u64 {
        match self {
            Self::User(user) => user.id,
            Self::Blog(blog) => blog.id,
            Self::Entry(entry) => entry.id,
        }
    }
}

impl From<User> for Resource {
    fn from(user: User) -> Self {
        Self::User(user)
    }
}

impl From<Blog> for Resource {
    fn from(blog: Blog) -> Self {
        Self::Blog(blog)
    }
}

impl From<Entry> for Resource {
    fn from(entry: Entry) -> Self {
        Self::Entry(entry)
    }
}

impl Record for User {
    const KIND: Kind = Kind::User;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![
            ("username", self.username.clone()),
            ("accesskey", self.accesskey.clone()),
        ]
    }
}

impl Record for Blog {
    const KIND: Kind = Kind::Blog;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

impl Record for Entry {
    const KIND: Kind = Kind::Entry;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

/// Decimal with exactly two places and at most five digits, stored in
/// hundredths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Scoring(i64);

impl Scoring {
    pub const MAX_DIGITS: usize = 5;
    pub const DECIMAL_PLACES: usize = 2;

    pub fn from_hundredths(hundredths: i64) -> Self {
        Self(hundredths)
    }
}

/// Why a decimal was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringError {
    Invalid,
    TooManyDigits,
    TooManyDecimalPlaces,
}

impl fmt::Display for ScoringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "A valid number is required."),
            Self::TooManyDigits => write!(
                f,
                "Ensure that there are no more than {} digits in total.",
                Scoring::MAX_DIGITS
            ),
            Self::TooManyDecimalPlaces => write!(
                f,
                "Ensure that there are no more than {} decimal places.",
                Scoring::DECIMAL_PLACES
            ),
        }
    }
}

impl FromStr for Scoring {
    type Err = ScoringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));

        let numeric = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && fraction.is_empty()) || !numeric(whole) || !numeric(fraction) {
            return Err(ScoringError::Invalid);
        }

        // Trailing zeros in the fraction carry no precision ("4.250" == "4.25")
        let fraction = fraction.trim_end_matches('0');
        let whole = whole.trim_start_matches('0');
        if fraction.len() > Self::DECIMAL_PLACES {
            return Err(ScoringError::TooManyDecimalPlaces);
        }
        if whole.len() > Self::MAX_DIGITS - Self::DECIMAL_PLACES {
            return Err(ScoringError::TooManyDigits);
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| ScoringError::Invalid)?
        };
        let mut cents: i64 = 0;
        for (i, b) in fraction.bytes().enumerate() {
            cents += i64::from(b - b'0') * if i == 0 { 10 } else { 1 };
        }

        let value = whole * 100 + cents;
        Ok(Self(if negative { -value } else { value }))
    }
}

impl fmt::Display for Scoring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// Accumulates per-field errors while a changeset is applied.
#[derive(Default)]
struct Validator {
    errors: FieldErrors,
}

impl Validator {
    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    /// Text field, checked for presence, blankness and length.
    fn text(
        &mut self,
        fields: &FieldSet,
        name: &str,
        target: &mut String,
        required: bool,
        max_len: Option<usize>,
        partial: bool,
    ) {
        let Some(value) = fields.text(name) else {
            if required && !partial {
                self.error(name, REQUIRED);
            } else if !partial {
                target.clear();
            }
            return;
        };
        let value = value.trim();

        if required && value.is_empty() {
            self.error(name, BLANK);
            return;
        }
        if let Some(max) = max_len {
            if value.chars().count() > max {
                self.error(
                    name,
                    format!("Ensure this field has no more than {max} characters."),
                );
                return;
            }
        }
        *target = value.to_string();
    }

    fn finish(self) -> Result<(), FieldErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

impl Changeset for User {
    fn apply(&mut self, fields: &FieldSet, partial: bool) -> Result<(), FieldErrors> {
        let mut v = Validator::default();
        v.text(fields, "username", &mut self.username, true, Some(150), partial);
        v.text(fields, "first_name", &mut self.first_name, false, Some(30), partial);
        v.text(fields, "last_name", &mut self.last_name, false, Some(150), partial);
        v.text(fields, "email", &mut self.email, false, Some(254), partial);
        v.text(fields, "accesskey", &mut self.accesskey, true, Some(32), partial);
        v.text(fields, "secretkey", &mut self.secretkey, true, Some(32), partial);

        let username_ok = self
            .username
            .chars()
            .all(|c| c.is_alphanumeric() || "@.+-_".contains(c));
        if !username_ok {
            v.error(
                "username",
                "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
            );
        }
        if !self.email.is_empty() && !is_email(&self.email) {
            v.error("email", "Enter a valid email address.");
        }
        v.finish()
    }
}

impl Changeset for Blog {
    fn apply(&mut self, fields: &FieldSet, partial: bool) -> Result<(), FieldErrors> {
        let mut v = Validator::default();
        v.text(fields, "name", &mut self.name, true, Some(100), partial);
        v.text(fields, "tagline", &mut self.tagline, false, None, partial);
        v.finish()
    }
}

impl Changeset for Entry {
    /// Validates scalar fields and parses references. Whether referenced
    /// rows exist, and the `image` upload, are checked against the store.
    fn apply(&mut self, fields: &FieldSet, partial: bool) -> Result<(), FieldErrors> {
        let mut v = Validator::default();
        v.text(fields, "headline", &mut self.headline, true, Some(255), partial);
        v.text(fields, "body_text", &mut self.body_text, true, None, partial);

        match fields.text("blog") {
            Some(raw) if !raw.trim().is_empty() => match links::parse_ref(Kind::Blog, raw) {
                Some(id) => self.blog = id,
                None => v.error("blog", "Invalid hyperlink - No URL match."),
            },
            Some(_) => v.error("blog", REQUIRED),
            None if !partial => v.error("blog", REQUIRED),
            None => {}
        }

        if fields.contains("users") {
            let mut users = Vec::new();
            for raw in fields.texts("users") {
                match links::parse_ref(Kind::User, raw) {
                    Some(id) if !users.contains(&id) => users.push(id),
                    Some(_) => {}
                    None => v.error("users", "Invalid hyperlink - No URL match."),
                }
            }
            self.users = users;
        } else if !partial {
            self.users.clear();
        }

        match fields.text("number_comments") {
            Some(raw) => match raw.trim().parse::<i64>() {
                Ok(n) if n < 0 => {
                    v.error("number_comments", "Ensure this value is greater than or equal to 0.")
                }
                Ok(n) => match u32::try_from(n) {
                    Ok(n) => self.number_comments = n,
                    Err(_) => v.error("number_comments", "A valid integer is required."),
                },
                Err(_) => v.error("number_comments", "A valid integer is required."),
            },
            None if !partial => v.error("number_comments", REQUIRED),
            None => {}
        }

        match fields.text("scoring") {
            Some(raw) => match raw.parse::<Scoring>() {
                Ok(scoring) => self.scoring = scoring,
                Err(err) => v.error("scoring", err.to_string()),
            },
            None if !partial => v.error("scoring", REQUIRED),
            None => {}
        }

        if let Some(raw) = fields.text("pub_date") {
            match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
                Ok(date) => self.pub_date = date,
                Err(_) => v.error(
                    "pub_date",
                    "Date has wrong format. Use one of these formats instead: YYYY-MM-DD.",
                ),
            }
        }

        v.finish()
    }
}

fn is_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !value.chars().any(char::is_whitespace)
        }
        None => false,
    }
}
