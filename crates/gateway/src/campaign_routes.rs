//! `/api/campaign/send` and `/api/campaign/status/{campaign_id}`.

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::{Path, State, rejection::JsonRejection},
    },
    bulkwa_campaigns::NewCampaign,
    bulkwa_common::{Campaign, CampaignStatus},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendCampaignRequest {
    pub user_id: Option<String>,
    pub campaign_id: Option<String>,
    pub contacts: Option<Value>,
    pub message: Option<String>,
    pub media_url: Option<String>,
    /// Pause between recipients, in milliseconds.
    pub delay: Option<u64>,
    pub schedule_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendCampaignResponse {
    pub success: bool,
    pub message: &'static str,
    pub campaign_id: String,
    pub status: CampaignStatus,
}

#[derive(Debug, Serialize)]
pub struct CampaignResponse {
    pub success: bool,
    pub campaign: Campaign,
}

impl SendCampaignRequest {
    fn into_new_campaign(self) -> Result<NewCampaign, ApiError> {
        let account_id = self.user_id.filter(|id| !id.trim().is_empty());
        let recipients = self.contacts.filter(|c| !c.is_null());
        let body = self.message.unwrap_or_default();
        let media_ref = self.media_url.filter(|url| !url.trim().is_empty());
        let (Some(account_id), Some(recipients)) = (account_id, recipients) else {
            return Err(ApiError::missing_fields());
        };
        if body.trim().is_empty() && media_ref.is_none() {
            return Err(ApiError::missing_fields());
        }
        Ok(NewCampaign {
            id: self.campaign_id,
            account_id,
            recipients,
            body,
            media_ref,
            pacing_ms: self.delay,
            schedule_at: self.schedule_at,
        })
    }
}

pub async fn send_campaign(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SendCampaignRequest>, JsonRejection>,
) -> Result<Json<SendCampaignResponse>, ApiError> {
    let Json(req) = payload?;
    let campaign = state.campaigns.submit(req.into_new_campaign()?).await?;
    let message = match campaign.status {
        CampaignStatus::Scheduled => "Campaign scheduled",
        _ => "Campaign started",
    };
    Ok(Json(SendCampaignResponse {
        success: true,
        message,
        campaign_id: campaign.id,
        status: campaign.status,
    }))
}

pub async fn campaign_status(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<String>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let campaign = state
        .campaigns
        .campaign(&campaign_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("campaign {campaign_id} not found")))?;
    Ok(Json(CampaignResponse {
        success: true,
        campaign,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, serde_json::json};

    fn request(value: Value) -> SendCampaignRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn media_only_campaign_is_accepted() {
        let new = request(json!({
            "userId": "acct",
            "contacts": ["15550000001"],
            "mediaUrl": "https://cdn.example.com/a.png",
            "delay": 500,
        }))
        .into_new_campaign()
        .unwrap();
        assert_eq!(new.body, "");
        assert_eq!(new.pacing_ms, Some(500));
        assert!(new.media_ref.is_some());
    }

    #[test]
    fn missing_fields_are_rejected() {
        for body in [
            json!({ "contacts": ["1"], "message": "hi" }),
            json!({ "userId": "acct", "message": "hi" }),
            json!({ "userId": "acct", "contacts": ["1"] }),
            json!({ "userId": " ", "contacts": ["1"], "message": "hi" }),
        ] {
            let err = request(body).into_new_campaign().unwrap_err();
            assert!(matches!(err, ApiError::BadRequest(_)));
        }
    }
}
