//! crates/reading_tracker_core/src/derived.rs
//!
//! Pure functions that turn the published collections plus the library filter
//! into presentation-ready state: streaks, calendar months, filtered and sorted
//! shelves. Nothing here is cached; callers recompute whenever inputs change.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::domain::{Book, ReadingSession, Streak, StreakStatus};

/// Genres offered by the book form before the user has any of their own.
pub const COMMON_GENRES: [&str; 16] = [
    "Fiction",
    "Non-Fiction",
    "Fantasy",
    "Science Fiction",
    "Mystery",
    "Thriller",
    "Romance",
    "Horror",
    "Biography",
    "History",
    "Self-Help",
    "Business",
    "Poetry",
    "Children",
    "Comics/Manga",
    "Classics",
];

//=========================================================================================
// Streak
//=========================================================================================

/// Distinct dates with at least one session.
pub fn read_dates(sessions: &[ReadingSession]) -> BTreeSet<NaiveDate> {
    sessions.iter().map(|s| s.date).collect()
}

/// Computes the streak anchored to `today` or yesterday.
pub fn compute_streak(dates: &BTreeSet<NaiveDate>, today: NaiveDate) -> Streak {
    let mut newest_first = dates.iter().rev();
    let Some(&last_read) = newest_first.next() else {
        return Streak::NONE;
    };
    let yesterday = today - Duration::days(1);
    if last_read != today && last_read != yesterday {
        return Streak::NONE;
    }

    let mut count = 1;
    let mut previous = last_read;
    for &date in newest_first {
        if previous - date != Duration::days(1) {
            break;
        }
        count += 1;
        previous = date;
    }

    let status = if last_read == today {
        StreakStatus::Active
    } else {
        StreakStatus::Pending
    };
    Streak { status, count }
}

pub fn has_read_on(sessions: &[ReadingSession], day: NaiveDate) -> bool {
    sessions.iter().any(|s| s.date == day)
}

//=========================================================================================
// Calendar
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub day: u32,
    pub is_read: bool,
    pub is_today: bool,
    pub is_selected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarMonth {
    pub year: i32,
    pub month: u32,
    /// Empty cells before the 1st in a Sunday-first week grid.
    pub leading_blanks: u32,
    /// Distinct days of this month with at least one session.
    pub days_read: usize,
    pub days: Vec<CalendarDay>,
    pub selected: Option<NaiveDate>,
    /// Sessions logged on the selected day, in published order.
    pub selected_sessions: Vec<ReadingSession>,
}

/// Builds the calendar of `year`/`month`. Returns `None` for an invalid month.
pub fn calendar_month(
    sessions: &[ReadingSession],
    year: i32,
    month: u32,
    today: NaiveDate,
    selected: Option<NaiveDate>,
) -> Option<CalendarMonth> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let dates = read_dates(sessions);

    let days: Vec<CalendarDay> = first
        .iter_days()
        .take_while(|date| *date < next_first)
        .map(|date| CalendarDay {
            date,
            day: date.day(),
            is_read: dates.contains(&date),
            is_today: date == today,
            is_selected: selected == Some(date),
        })
        .collect();
    let days_read = days.iter().filter(|d| d.is_read).count();

    Some(CalendarMonth {
        year,
        month,
        leading_blanks: first.weekday().num_days_from_sunday(),
        days_read,
        days,
        selected,
        selected_sessions: selected
            .map(|day| sessions_on(sessions, day))
            .unwrap_or_default(),
    })
}

pub fn sessions_on(sessions: &[ReadingSession], day: NaiveDate) -> Vec<ReadingSession> {
    sessions.iter().filter(|s| s.date == day).cloned().collect()
}

//=========================================================================================
// Filter, Sort, Shelves
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    /// Keep the synced manual order.
    #[default]
    Custom,
    Favorites,
    Author,
    Title,
}

impl SortMode {
    /// Parses a sort key; anything unrecognized sorts by title.
    pub fn from_key(key: &str) -> Self {
        match key.trim().to_ascii_lowercase().as_str() {
            "custom" => SortMode::Custom,
            "favorites" => SortMode::Favorites,
            "author" => SortMode::Author,
            _ => SortMode::Title,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "genre")]
pub enum GenreFilter {
    #[default]
    All,
    Exact(String),
}

impl GenreFilter {
    /// `"Todos"`, `"all"` and blank select every genre.
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") || trimmed.eq_ignore_ascii_case("todos") {
            GenreFilter::All
        } else {
            GenreFilter::Exact(trimmed.to_string())
        }
    }

    fn matches(&self, book: &Book) -> bool {
        match self {
            GenreFilter::All => true,
            GenreFilter::Exact(genre) => !book.genre.is_empty() && book.genre == *genre,
        }
    }
}

/// The library's search box, genre chip and sort selector.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LibraryFilter {
    pub search: String,
    pub genre: GenreFilter,
    pub sort: SortMode,
}

fn matches_search(book: &Book, needle_lower: &str) -> bool {
    book.title.to_lowercase().contains(needle_lower)
        || (!book.author.is_empty() && book.author.to_lowercase().contains(needle_lower))
}

/// Case-insensitive comparison with a byte-wise tiebreak, so the order is total.
fn collate(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b))
}

/// Applies the filter and sort mode. `Custom` keeps the input order.
pub fn filter_and_sort(books: &[Book], filter: &LibraryFilter) -> Vec<Book> {
    let needle = filter.search.to_lowercase();
    let mut visible: Vec<Book> = books
        .iter()
        .filter(|book| matches_search(book, &needle) && filter.genre.matches(book))
        .cloned()
        .collect();

    match filter.sort {
        SortMode::Custom => {}
        SortMode::Favorites => visible.sort_by(|a, b| {
            b.is_favorite
                .cmp(&a.is_favorite)
                .then_with(|| collate(&a.title, &b.title))
        }),
        SortMode::Author => visible.sort_by(|a, b| collate(&a.author, &b.author)),
        SortMode::Title => visible.sort_by(|a, b| collate(&a.title, &b.title)),
    }
    visible
}

/// Books per shelf for a viewport width in CSS pixels.
pub fn items_per_shelf(viewport_width: u32) -> usize {
    match viewport_width {
        w if w < 640 => 5,
        w if w < 768 => 8,
        w if w < 1024 => 12,
        _ => 16,
    }
}

pub fn shelves(books: &[Book], per_shelf: usize) -> Vec<Vec<Book>> {
    books.chunks(per_shelf.max(1)).map(|shelf| shelf.to_vec()).collect()
}

/// Spine width in pixels for the shelf view.
pub fn spine_thickness(page_count: Option<u32>) -> f64 {
    match page_count {
        None | Some(0) => 46.0,
        Some(pages) => (f64::from(pages) / 100.0 * 8.0 + 32.0).clamp(36.0, 70.0),
    }
}

/// Distinct genres present in the library, sorted.
pub fn library_genres(books: &[Book]) -> Vec<String> {
    books
        .iter()
        .filter(|b| !b.genre.is_empty())
        .map(|b| b.genre.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Options for the genre field of the book form, narrowed by what has been typed.
pub fn genre_options(books: &[Book], typed: &str) -> Vec<String> {
    let needle = typed.to_lowercase();
    COMMON_GENRES
        .iter()
        .map(|g| g.to_string())
        .chain(library_genres(books))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|g| g.to_lowercase().contains(&needle))
        .collect()
}

/// Books offered by the session form's book picker.
pub fn books_matching(books: &[Book], term: &str) -> Vec<Book> {
    let needle = term.to_lowercase();
    books
        .iter()
        .filter(|b| matches_search(b, &needle))
        .cloned()
        .collect()
}

//=========================================================================================
// Aggregate View
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShelvedBook {
    #[serde(flatten)]
    pub book: Book,
    pub spine_thickness: f64,
}

/// Everything the library screen renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibraryView {
    pub filter: LibraryFilter,
    pub total_books: usize,
    pub visible_books: usize,
    pub items_per_shelf: usize,
    pub shelves: Vec<Vec<ShelvedBook>>,
    pub genres: Vec<String>,
    pub streak: Streak,
    pub read_today: bool,
}

impl LibraryView {
    pub fn compute(
        books: &[Book],
        sessions: &[ReadingSession],
        filter: &LibraryFilter,
        viewport_width: u32,
        today: NaiveDate,
    ) -> Self {
        let visible = filter_and_sort(books, filter);
        let per_shelf = items_per_shelf(viewport_width);
        let shelves = shelves(&visible, per_shelf)
            .into_iter()
            .map(|shelf| {
                shelf
                    .into_iter()
                    .map(|book| ShelvedBook {
                        spine_thickness: spine_thickness(book.page_count),
                        book,
                    })
                    .collect()
            })
            .collect();

        Self {
            filter: filter.clone(),
            total_books: books.len(),
            visible_books: visible.len(),
            items_per_shelf: per_shelf,
            shelves,
            genres: library_genres(books),
            streak: compute_streak(&read_dates(sessions), today),
            read_today: has_read_on(sessions, today),
        }
    }
}
