pub mod sentry_scrub;
