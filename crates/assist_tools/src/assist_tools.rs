mod brave_search;
pub mod config;
mod error;
mod find_places;
pub mod forecast;
mod home_assistant;
mod response;
mod searxng_search;
pub mod text;
pub mod units;
mod utils;
mod weather_forecast;
mod wikipedia_search;

pub use crate::{
    brave_search::BraveSearchTool,
    config::Config,
    error::ToolError,
    find_places::FindPlacesTool,
    home_assistant::{ForecastProvider, HomeAssistantForecasts, extract_forecast},
    response::{NO_RESULTS, SearchResult, SearchResults, ToolResponse},
    searxng_search::SearxngSearchTool,
    weather_forecast::{NO_FORECAST, WeatherForecastTool},
    wikipedia_search::WikipediaSearchTool,
};
