pub mod invitation;
pub mod participant;
pub mod room;

pub use invitation::{
    CreateInvitationRequest, CreateInvitationResponse, Invitation, InvitationInfo,
    InvitationStatus, RedeemRequest, RedeemTokenRequest, TokenPreview, UpdateInvitationRequest,
};
pub use participant::{
    Claims, ConnectionState, Participant, ParticipantInfo, PermissionLevel, WaitingTicket,
};
pub use room::{CreateRoomRequest, CreateRoomResponse, Room, RoomSettings, RoomStatus};
