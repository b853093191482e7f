use crate::share::ShareSubmission;
use serde::Serialize;

pub trait Method {
    const NAME: &'static str;
}

#[derive(Serialize, Debug)]
pub struct Request<P> {
    pub method: &'static str,
    pub params: P,
    pub id: u32,
}

impl<P: Method> Request<P> {
    pub fn new(params: P) -> Self {
        Request {
            method: P::NAME,
            params,
            id: 1,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct LoginParams {
    pub login: String,
    pub pass: String,
    pub rigid: String,
    pub agent: String,
}

impl Method for LoginParams {
    const NAME: &'static str = "login";
}

#[derive(Serialize, Debug)]
pub struct SubmitParams {
    pub id: String,
    pub job_id: String,
    pub nonce: String,
    pub result: String,
}

impl Method for SubmitParams {
    const NAME: &'static str = "submit";
}

impl From<ShareSubmission> for SubmitParams {
    fn from(share: ShareSubmission) -> Self {
        SubmitParams {
            id: share.miner_id,
            job_id: share.job_id,
            nonce: share.nonce,
            result: share.result,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct KeepAlivedParams {
    pub id: String,
}

impl Method for KeepAlivedParams {
    const NAME: &'static str = "keepalived";
}
