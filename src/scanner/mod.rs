pub mod extractor;
pub mod fetcher;
pub mod price;
pub mod types;

pub use extractor::{Extractor, HtmlExtractor};
pub use fetcher::{Fetcher, HttpFetcher, Paginator, SearchPage, SearchQuery};
pub use price::parse_price;
pub use types::{Availability, Currency, Listing, Money, RawListing};
