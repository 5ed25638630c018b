//! Closed set of job kinds

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    #[default]
    UnknownType,
    BuildTransportNetwork,
    CreateFeedVersionFromSnapshot,
    ProcessSnapshot,
    CreateSnapshot,
    RestoreSnapshot,
    ValidateFeed,
    FetchProjectFeeds,
    FetchSingleFeed,
    MakeProjectPublic,
    MergeProjectFeeds,
    ImportRecords,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::UnknownType => "UNKNOWN_TYPE",
            JobType::BuildTransportNetwork => "BUILD_TRANSPORT_NETWORK",
            JobType::CreateFeedVersionFromSnapshot => "CREATE_FEED_VERSION_FROM_SNAPSHOT",
            JobType::ProcessSnapshot => "PROCESS_SNAPSHOT",
            JobType::CreateSnapshot => "CREATE_SNAPSHOT",
            JobType::RestoreSnapshot => "RESTORE_SNAPSHOT",
            JobType::ValidateFeed => "VALIDATE_FEED",
            JobType::FetchProjectFeeds => "FETCH_PROJECT_FEEDS",
            JobType::FetchSingleFeed => "FETCH_SINGLE_FEED",
            JobType::MakeProjectPublic => "MAKE_PROJECT_PUBLIC",
            JobType::MergeProjectFeeds => "MERGE_PROJECT_FEEDS",
            JobType::ImportRecords => "IMPORT_RECORDS",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
